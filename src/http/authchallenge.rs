//! `WWW-Authenticate` / `Proxy-Authenticate` challenge parsing.
//!
//! Chromium mapping: net/http/http_auth_challenge_tokenizer.cc

use base64::{engine::general_purpose, Engine as _};
use http::{header, HeaderMap};
use std::fmt;
use zeroize::Zeroizing;

/// Authentication scheme named by a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
    Negotiate,
}

impl AuthScheme {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "digest" => Some(Self::Digest),
            "ntlm" => Some(Self::Ntlm),
            "negotiate" => Some(Self::Negotiate),
            _ => None,
        }
    }

    /// Preference when a response offers several schemes; higher wins.
    fn rank(self) -> u8 {
        match self {
            Self::Digest => 3,
            Self::Basic => 2,
            Self::Negotiate => 1,
            Self::Ntlm => 0,
        }
    }

    /// Whether the loader can answer this scheme itself.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Basic | Self::Digest)
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Basic => "Basic",
            Self::Digest => "Digest",
            Self::Ntlm => "NTLM",
            Self::Negotiate => "Negotiate",
        })
    }
}

/// Username and password. The password is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// `Basic <base64(user:pass)>`.
    pub fn basic_header_value(&self) -> String {
        let creds = Zeroizing::new(format!("{}:{}", self.username, self.password.as_str()));
        format!("Basic {}", general_purpose::STANDARD.encode(creds.as_bytes()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One parsed challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: AuthScheme,
    pub realm: String,
    /// Everything after the scheme token, for scheme-specific parsing.
    pub params: String,
    /// True for `407 Proxy-Authenticate`.
    pub is_proxy: bool,
    /// Host and port the challenge applies to (origin or proxy).
    pub host: String,
    pub port: u16,
}

impl AuthChallenge {
    /// Pick the strongest challenge in a 401/407 response.
    pub fn from_headers(headers: &HeaderMap, is_proxy: bool, host: &str, port: u16) -> Option<Self> {
        let name = if is_proxy {
            header::PROXY_AUTHENTICATE
        } else {
            header::WWW_AUTHENTICATE
        };

        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_challenge_line)
            .max_by_key(|(scheme, _)| scheme.rank())
            .map(|(scheme, params)| Self {
                scheme,
                realm: find_param(&params, "realm").unwrap_or_default(),
                params,
                is_proxy,
                host: host.to_ascii_lowercase(),
                port,
            })
    }
}

/// Split `Digest realm="x", nonce="y"` into scheme and parameter text.
fn parse_challenge_line(line: &str) -> Option<(AuthScheme, String)> {
    let line = line.trim();
    let (token, rest) = match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (line, ""),
    };
    AuthScheme::parse(token).map(|scheme| (scheme, rest.to_string()))
}

/// Split challenge parameters on commas outside quotes.
pub(crate) fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = params[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let part = params[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// Parse `key=value` or `key="value"`.
pub(crate) fn parse_param(param: &str) -> Option<(&str, &str)> {
    let (key, value) = param.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim(), value))
}

fn find_param(params: &str, name: &str) -> Option<String> {
    split_params(params)
        .into_iter()
        .filter_map(parse_param)
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_basic_challenge() {
        let mut h = HeaderMap::new();
        h.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"Secure Area\""));
        let c = AuthChallenge::from_headers(&h, false, "Example.com", 80).unwrap();
        assert_eq!(c.scheme, AuthScheme::Basic);
        assert_eq!(c.realm, "Secure Area");
        assert_eq!(c.host, "example.com");
        assert!(!c.is_proxy);
    }

    #[test]
    fn test_prefers_digest() {
        let mut h = HeaderMap::new();
        h.append(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"r\""));
        h.append(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Digest realm=\"r, with comma\", nonce=\"n\""),
        );
        let c = AuthChallenge::from_headers(&h, false, "h", 80).unwrap();
        assert_eq!(c.scheme, AuthScheme::Digest);
        assert_eq!(c.realm, "r, with comma");
    }

    #[test]
    fn test_proxy_header() {
        let mut h = HeaderMap::new();
        h.insert(header::PROXY_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"proxy\""));
        assert!(AuthChallenge::from_headers(&h, false, "p", 3128).is_none());
        let c = AuthChallenge::from_headers(&h, true, "p", 3128).unwrap();
        assert!(c.is_proxy);
        assert_eq!(c.port, 3128);
    }

    #[test]
    fn test_unknown_scheme_ignored() {
        let mut h = HeaderMap::new();
        h.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer realm=\"api\""));
        assert!(AuthChallenge::from_headers(&h, false, "h", 443).is_none());
    }

    #[test]
    fn test_basic_header_value() {
        let cred = Credential::new("user", "pass");
        assert_eq!(cred.basic_header_value(), "Basic dXNlcjpwYXNz");
        assert!(!format!("{:?}", cred).contains("pass\""));
    }
}
