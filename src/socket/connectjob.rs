use crate::base::context::{IoResultExt, Peer};
use crate::base::neterror::NetError;
use crate::socket::client::{ConnectedSocket, SocketType};
use crate::socket::proxy::{ProxySettings, ProxyType};
use crate::socket::tls::TlsConfig;
use crate::tls::truststore::TrustStore;
use crate::transport::share::ShareLocks;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::{Host, Url};

/// Largest CONNECT response head we accept from a proxy.
const MAX_TUNNEL_RESPONSE: usize = 8 * 1024;

/// Manages the connection process: DNS -> TCP -> proxy -> TLS.
/// Roughly equivalent to net::ConnectJob.
#[derive(Debug, Clone)]
pub struct ConnectJob {
    share: Arc<ShareLocks>,
    tls: Arc<TlsConfig>,
    trust: TrustStore,
    dns_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    verify_peer: bool,
    serialized: bool,
}

impl ConnectJob {
    pub fn new(share: Arc<ShareLocks>, tls: Arc<TlsConfig>, trust: TrustStore) -> Self {
        Self {
            share,
            tls,
            trust,
            dns_timeout: None,
            connect_timeout: None,
            verify_peer: true,
            serialized: false,
        }
    }

    pub fn with_timeouts(mut self, dns: Option<Duration>, connect: Option<Duration>) -> Self {
        self.dns_timeout = dns;
        self.connect_timeout = connect;
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Hold the shared connect lock for the whole setup.
    pub fn serialized(mut self, serialized: bool) -> Self {
        self.serialized = serialized;
        self
    }

    /// Open a socket ready to carry an HTTP/1.1 request for `url`.
    pub async fn connect(
        &self,
        url: &Url,
        proxy: Option<&ProxySettings>,
    ) -> Result<ConnectedSocket, NetError> {
        let host = target_host(url)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        let is_https = url.scheme() == "https";

        let _guard = if self.serialized {
            Some(self.share.connect_lock().await)
        } else {
            None
        };

        let mut via_http_proxy = false;
        let stream = match proxy {
            None => self.open_tcp(Peer::Origin { host: &host, port }).await?,
            Some(p) => {
                let mut stream = self
                    .open_tcp(Peer::Proxy {
                        host: &p.host,
                        port: p.port,
                    })
                    .await?;
                match p.proxy_type {
                    ProxyType::Http if is_https => {
                        establish_tunnel(&mut stream, &host, port, p).await?
                    }
                    ProxyType::Http => via_http_proxy = true,
                    ProxyType::Socks5 => socks5_handshake(&mut stream, &host, port, p).await?,
                }
                stream
            }
        };

        if !is_https {
            return Ok(ConnectedSocket {
                socket: SocketType::Tcp(stream),
                via_http_proxy,
                trust: None,
            });
        }

        let (socket, trust) = self.handshake(stream, &host, port).await?;
        Ok(ConnectedSocket {
            socket,
            via_http_proxy: false,
            trust: Some(trust),
        })
    }

    async fn open_tcp(&self, peer: Peer<'_>) -> Result<TcpStream, NetError> {
        let addrs = self.share.resolve(peer, self.dns_timeout).await?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = TcpStream::connect(addr);
            let result = match self.connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(%peer, %addr, "connect attempt timed out");
                        last_error = Some(NetError::ConnectionTimedOut);
                        continue;
                    }
                },
                None => attempt.await,
            };
            match result.connection_context(peer) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(%peer, %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let error = last_error.unwrap_or_else(|| peer.unreachable());
        if peer.is_proxy() {
            tracing::warn!(%peer, error = %error, "proxy unreachable");
        }
        Err(error)
    }

    async fn handshake(
        &self,
        stream: TcpStream,
        host: &str,
        port: u16,
    ) -> Result<(SocketType, crate::tls::truststore::PeerTrust), NetError> {
        let (connector, generation) = self.share.tls_connector(&self.tls, &self.trust)?;
        let mut config = connector
            .configure()
            .map_err(|_| NetError::SslProtocolError)?;
        config.set_use_server_name_indication(TlsConfig::should_set_sni(host));
        self.trust
            .configure_connection(&mut config, host, self.verify_peer);

        let authority = format!("{host}:{port}");
        if let Some(session) = self.share.tls_session(&authority, generation) {
            // SAFETY: sessions are stored per connector generation and the
            // lookup only returns ones created by `connector`.
            if unsafe { config.set_session(&session) }.is_err() {
                tracing::debug!(host, "could not offer cached TLS session");
            }
        }

        let stream = tokio_boring::connect(config, host, stream)
            .await
            .map_err(|e| {
                let code = e.ssl().map(|ssl| ssl.verify_result().as_raw());
                tracing::warn!(host, error = %e, ?code, "TLS handshake failed");
                map_verify_error(code, &e)
            })?;

        let trust = self.trust.check_peer(stream.ssl(), host, self.verify_peer)?;
        if let Some(session) = stream.ssl().session() {
            self.share
                .store_tls_session(&authority, generation, session.to_owned());
        }
        tracing::debug!(host, resumed = stream.ssl().session_reused(), "TLS established");
        Ok((SocketType::Ssl(stream), trust))
    }
}

/// Host without IPv6 brackets.
fn target_host(url: &Url) -> Result<String, NetError> {
    match url.host() {
        Some(Host::Domain(d)) => Ok(d.to_string()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(NetError::InvalidUrl),
    }
}


/// Translate an X509 verify result into a certificate error.
fn map_verify_error(code: Option<i32>, err: &impl std::fmt::Display) -> NetError {
    match code {
        Some(9 | 10) => NetError::CertDateInvalid,
        Some(18 | 19 | 20 | 21) => NetError::CertAuthorityInvalid,
        Some(23) => NetError::CertRevoked,
        Some(62) => NetError::CertCommonNameInvalid,
        _ => NetError::handshake_failed(err),
    }
}

/// Send `CONNECT host:port` and wait for a 2xx.
async fn establish_tunnel(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    proxy: &ProxySettings,
) -> Result<(), NetError> {
    let target = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(auth) = proxy.auth_header() {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|_| NetError::TunnelConnectionFailed)?;

    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_TUNNEL_RESPONSE {
            return Err(NetError::TunnelConnectionFailed);
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|_| NetError::TunnelConnectionFailed)?;
        if n == 0 {
            return Err(NetError::TunnelConnectionFailed);
        }
        head.push(byte[0]);
    }

    let status = parse_status_line(&head).ok_or(NetError::TunnelConnectionFailed)?;
    match status {
        200..=299 => {
            tracing::debug!(proxy = %proxy.authority(), target, "tunnel established");
            Ok(())
        }
        407 => Err(NetError::ProxyAuthRequested),
        _ => {
            tracing::warn!(proxy = %proxy.authority(), target, status, "proxy refused tunnel");
            Err(NetError::TunnelConnectionFailed)
        }
    }
}

fn parse_status_line(head: &[u8]) -> Option<u16> {
    let line = head.split(|b| *b == b'\r').next()?;
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// RFC 1928 handshake, with RFC 1929 username/password when configured.
/// Domain names are passed through for the proxy to resolve.
async fn socks5_handshake(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    proxy: &ProxySettings,
) -> Result<(), NetError> {
    let io_err = |_| NetError::ProxyConnectionFailed;

    let greeting: &[u8] = if proxy.credential.is_some() {
        &[5, 2, 0x00, 0x02]
    } else {
        &[5, 1, 0x00]
    };
    stream.write_all(greeting).await.map_err(io_err)?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(io_err)?;
    if choice[0] != 5 {
        return Err(NetError::ProxyConnectionFailed);
    }
    match (choice[1], &proxy.credential) {
        (0x00, _) => {}
        (0x02, Some(credential)) => {
            let user = credential.username.as_bytes();
            let pass = credential.password.as_bytes();
            if user.len() > 255 || pass.len() > 255 {
                return Err(NetError::InvalidAuthCredentials);
            }
            let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
            auth.push(1);
            auth.push(user.len() as u8);
            auth.extend_from_slice(user);
            auth.push(pass.len() as u8);
            auth.extend_from_slice(pass);
            stream.write_all(&auth).await.map_err(io_err)?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await.map_err(io_err)?;
            if status[1] != 0 {
                return Err(NetError::ProxyAuthRequested);
            }
        }
        (0x02, None) => return Err(NetError::ProxyAuthRequested),
        _ => return Err(NetError::ProxyConnectionFailed),
    }

    let mut request = vec![5, 1, 0];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(1);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(4);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(NetError::InvalidUrl);
            }
            request.push(3);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(io_err)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(io_err)?;
    if reply[0] != 5 {
        return Err(NetError::ProxyConnectionFailed);
    }
    match reply[1] {
        0 => {}
        3 => return Err(NetError::AddressUnreachable),
        4 => return Err(NetError::NameNotResolved),
        5 => return Err(NetError::ConnectionRefused),
        code => {
            tracing::warn!(proxy = %proxy.authority(), code, "SOCKS5 connect rejected");
            return Err(NetError::ProxyConnectionFailed);
        }
    }

    // Bound address, ignored.
    let skip = match reply[3] {
        1 => 4,
        4 => 16,
        3 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(io_err)?;
            len[0] as usize
        }
        _ => return Err(NetError::ProxyConnectionFailed),
    };
    let mut rest = vec![0u8; skip + 2];
    stream.read_exact(&mut rest).await.map_err(io_err)?;
    Ok(())
}
