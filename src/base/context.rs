//! Error context for the network steps of a connect job.
//!
//! The same I/O failure means different things depending on which end of
//! the route it came from: a refused connection to the origin names the
//! origin, while anything that goes wrong on the way to a proxy is reported
//! as a proxy failure so the loader never blames the origin for it.

use crate::base::neterror::NetError;
use std::fmt;
use std::io;

/// One end of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer<'a> {
    /// The server named in the request URL.
    Origin { host: &'a str, port: u16 },
    /// The proxy the request is routed through.
    Proxy { host: &'a str, port: u16 },
}

impl<'a> Peer<'a> {
    pub fn host(&self) -> &'a str {
        match *self {
            Peer::Origin { host, .. } | Peer::Proxy { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match *self {
            Peer::Origin { port, .. } | Peer::Proxy { port, .. } => port,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Peer::Proxy { .. })
    }

    /// Error for a lookup that returned no addresses.
    pub fn not_resolved(&self) -> NetError {
        match self {
            Peer::Origin { .. } => NetError::NameNotResolved,
            Peer::Proxy { .. } => NetError::ProxyConnectionFailed,
        }
    }

    /// Error when no address could be tried at all.
    pub fn unreachable(&self) -> NetError {
        match self {
            Peer::Origin { .. } => NetError::ConnectionFailed,
            Peer::Proxy { .. } => NetError::ProxyConnectionFailed,
        }
    }
}

impl fmt::Display for Peer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Origin { host, port } => write!(f, "{host}:{port}"),
            Peer::Proxy { host, port } => write!(f, "proxy {host}:{port}"),
        }
    }
}

/// Attach a [`Peer`] to I/O results of DNS and TCP steps.
pub trait IoResultExt<T> {
    /// Map a failed TCP connect.
    ///
    /// # Example
    /// ```ignore
    /// use netloader::base::context::{IoResultExt, Peer};
    ///
    /// let stream = TcpStream::connect(addr)
    ///     .await
    ///     .connection_context(Peer::Origin { host: "example.com", port: 443 })?;
    /// ```
    fn connection_context(self, peer: Peer<'_>) -> Result<T, NetError>;

    /// Map a failed name lookup.
    fn dns_context(self, peer: Peer<'_>) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, peer: Peer<'_>) -> Result<T, NetError> {
        self.map_err(|e| match (peer, e.kind()) {
            (_, io::ErrorKind::TimedOut) => NetError::ConnectionTimedOut,
            (Peer::Origin { host, port }, _) => NetError::connection_failed_to(host, port, e),
            (Peer::Proxy { .. }, _) => NetError::ProxyConnectionFailed,
        })
    }

    fn dns_context(self, peer: Peer<'_>) -> Result<T, NetError> {
        self.map_err(|e| match peer {
            Peer::Origin { host, .. } => NetError::dns_failed(host, e),
            Peer::Proxy { .. } => NetError::ProxyConnectionFailed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    const ORIGIN: Peer<'static> = Peer::Origin {
        host: "example.com",
        port: 443,
    };
    const PROXY: Peer<'static> = Peer::Proxy {
        host: "proxy.corp",
        port: 8080,
    };

    fn refused() -> Result<(), io::Error> {
        Err(Error::new(ErrorKind::ConnectionRefused, "refused"))
    }

    #[test]
    fn test_origin_connect_names_origin() {
        match refused().connection_context(ORIGIN).unwrap_err() {
            NetError::ConnectionFailedTo { host, port, .. } => {
                assert_eq!(host, "example.com");
                assert_eq!(port, 443);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_proxy_failures_blame_proxy() {
        assert_eq!(
            refused().connection_context(PROXY).unwrap_err(),
            NetError::ProxyConnectionFailed
        );
        let lookup: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        assert_eq!(lookup.dns_context(PROXY).unwrap_err(), NetError::ProxyConnectionFailed);
        assert_eq!(PROXY.not_resolved(), NetError::ProxyConnectionFailed);
        assert_eq!(PROXY.unreachable(), NetError::ProxyConnectionFailed);
    }

    #[test]
    fn test_timeout_kept_for_either_end() {
        for peer in [ORIGIN, PROXY] {
            let timed_out: Result<(), io::Error> = Err(Error::new(ErrorKind::TimedOut, "slow"));
            assert_eq!(
                timed_out.connection_context(peer).unwrap_err(),
                NetError::ConnectionTimedOut
            );
        }
    }

    #[test]
    fn test_origin_lookup_names_domain() {
        let lookup: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        match lookup.dns_context(ORIGIN).unwrap_err() {
            NetError::NameNotResolvedFor { domain, .. } => assert_eq!(domain, "example.com"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ORIGIN.not_resolved(), NetError::NameNotResolved);
        assert_eq!(PROXY.to_string(), "proxy proxy.corp:8080");
    }
}
