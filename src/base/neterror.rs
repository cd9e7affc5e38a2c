use std::fmt;
use thiserror::Error;

/// Network error codes. Numbering follows Chromium's `net_error_list.h`
/// where a matching code exists; loader-specific codes live at -900 and below.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo { host: String, port: u16, reason: String },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name {domain} not resolved: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("Internet disconnected")]
    InternetDisconnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("SSL client auth cert needed")]
    SslClientAuthCertNeeded,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Timed out")]
    TimedOut,
    #[error("Proxy auth requested")]
    ProxyAuthRequested,
    #[error("Proxy connection failed")]
    ProxyConnectionFailed,
    #[error("Bad SSL client auth cert")]
    BadSslClientAuthCert,
    #[error("SSL handshake failed: {reason}")]
    SslHandshakeFailed { reason: String },

    // Certificate Errors
    #[error("Certificate common name invalid")]
    CertCommonNameInvalid,
    #[error("Certificate date invalid")]
    CertDateInvalid,
    #[error("Certificate authority invalid")]
    CertAuthorityInvalid,
    #[error("Certificate revoked")]
    CertRevoked,
    #[error("Certificate is blacklisted")]
    CertBlacklisted,
    #[error("Certificate invalid")]
    CertInvalid,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Disallowed URL scheme")]
    DisallowedUrlScheme,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Unsafe redirect")]
    UnsafeRedirect,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Method not supported")]
    MethodNotSupported,
    #[error("Unexpected proxy auth")]
    UnexpectedProxyAuth,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Content decoding failed")]
    ContentDecodingFailed,
    #[error("Invalid auth credentials")]
    InvalidAuthCredentials,
    #[error("Unsupported auth scheme")]
    UnsupportedAuthScheme,
    #[error("Missing auth credentials")]
    MissingAuthCredentials,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Upload file changed")]
    UploadFileChanged,
    #[error("File not found")]
    FileNotFound,
    #[error("Access denied")]
    AccessDenied,

    // Cache Errors
    #[error("Cache miss")]
    CacheMiss,
    #[error("Cache read failed: {reason}")]
    CacheReadFailed { reason: String },
    #[error("Cache write failed: {reason}")]
    CacheWriteFailed { reason: String },

    // Loader Errors
    #[error("Request aborted")]
    Aborted,
    #[error("Request denied by admission policy: {reason}")]
    AdmissionDenied { reason: String },
    #[error("Body delivery refused by client")]
    DataRefused,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn connection_failed_to(host: &str, port: u16, err: std::io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            reason: err.to_string(),
        }
    }

    pub fn dns_failed(domain: &str, err: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn handshake_failed(reason: impl fmt::Display) -> Self {
        NetError::SslHandshakeFailed {
            reason: reason.to_string(),
        }
    }

    pub fn admission_denied(reason: impl Into<String>) -> Self {
        NetError::AdmissionDenied {
            reason: reason.into(),
        }
    }

    pub fn cache_read_failed(reason: impl fmt::Display) -> Self {
        NetError::CacheReadFailed {
            reason: reason.to_string(),
        }
    }

    /// True for failures that happened while negotiating TLS with the peer.
    pub fn is_ssl_failure(&self) -> bool {
        matches!(
            self,
            NetError::SslProtocolError
                | NetError::SslHandshakeFailed { .. }
                | NetError::CertCommonNameInvalid
                | NetError::CertDateInvalid
                | NetError::CertAuthorityInvalid
                | NetError::CertRevoked
                | NetError::CertBlacklisted
                | NetError::CertInvalid
        )
    }

    /// True for timeouts, regardless of the phase they happened in.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::ConnectionTimedOut | NetError::TimedOut)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::InternetDisconnected => -106,
            NetError::SslProtocolError => -107,
            NetError::AddressUnreachable => -109,
            NetError::SslClientAuthCertNeeded => -110,
            NetError::TunnelConnectionFailed => -111,
            NetError::BadSslClientAuthCert => -117,
            NetError::ConnectionTimedOut => -118,
            NetError::ProxyAuthRequested => -127,
            NetError::ProxyConnectionFailed => -130,
            NetError::SslHandshakeFailed { .. } => -148,

            NetError::CertCommonNameInvalid => -200,
            NetError::CertDateInvalid => -201,
            NetError::CertAuthorityInvalid => -202,
            NetError::CertRevoked => -206,
            NetError::CertInvalid => -207,
            NetError::CertBlacklisted => -210,

            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::UnsafeRedirect => -311,
            NetError::InvalidResponse => -320,
            NetError::MethodNotSupported => -322,
            NetError::UnexpectedProxyAuth => -323,
            NetError::EmptyResponse => -324,
            NetError::ContentDecodingFailed => -330,
            NetError::InvalidAuthCredentials => -338,
            NetError::UnsupportedAuthScheme => -339,
            NetError::MissingAuthCredentials => -341,
            NetError::ContentLengthMismatch => -354,

            NetError::TimedOut => -7,
            NetError::FileNotFound => -6,
            NetError::UploadFileChanged => -14,
            NetError::AccessDenied => -10,
            NetError::Aborted => -3,

            NetError::CacheMiss => -400,
            NetError::CacheReadFailed { .. } => -401,
            NetError::CacheWriteFailed { .. } => -410,

            // Loader-specific codes
            NetError::AdmissionDenied { .. } => -910,
            NetError::DataRefused => -911,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -106 => NetError::InternetDisconnected,
            -107 => NetError::SslProtocolError,
            -109 => NetError::AddressUnreachable,
            -110 => NetError::SslClientAuthCertNeeded,
            -111 => NetError::TunnelConnectionFailed,
            -117 => NetError::BadSslClientAuthCert,
            -118 => NetError::ConnectionTimedOut,
            -127 => NetError::ProxyAuthRequested,
            -130 => NetError::ProxyConnectionFailed,

            -200 => NetError::CertCommonNameInvalid,
            -201 => NetError::CertDateInvalid,
            -202 => NetError::CertAuthorityInvalid,
            -206 => NetError::CertRevoked,
            -207 => NetError::CertInvalid,
            -210 => NetError::CertBlacklisted,

            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -311 => NetError::UnsafeRedirect,
            -320 => NetError::InvalidResponse,
            -322 => NetError::MethodNotSupported,
            -323 => NetError::UnexpectedProxyAuth,
            -324 => NetError::EmptyResponse,
            -330 => NetError::ContentDecodingFailed,
            -338 => NetError::InvalidAuthCredentials,
            -339 => NetError::UnsupportedAuthScheme,
            -341 => NetError::MissingAuthCredentials,
            -354 => NetError::ContentLengthMismatch,

            -7 => NetError::TimedOut,
            -6 => NetError::FileNotFound,
            -14 => NetError::UploadFileChanged,
            -10 => NetError::AccessDenied,
            -3 => NetError::Aborted,

            -400 => NetError::CacheMiss,
            -911 => NetError::DataRefused,
            _ => NetError::Unknown(code),
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::TimedOut => NetError::TimedOut,
            ErrorKind::NotFound => NetError::FileNotFound,
            ErrorKind::PermissionDenied => NetError::AccessDenied,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            _ => NetError::ConnectionFailed,
        }
    }
}
