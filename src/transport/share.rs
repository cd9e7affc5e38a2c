//! Resources shared by every transfer of one loader context.
//!
//! Transfers run on transport worker threads, so each shared resource sits
//! behind its own lock: the cookie jar, the DNS cache, the TLS connector with
//! its session cache, a generic share lock, and the connect lock.

use crate::base::context::{IoResultExt, Peer};
use crate::base::neterror::NetError;
use crate::cookies::monster::CookieMonster;
use crate::socket::tls::TlsConfig;
use crate::tls::truststore::TrustStore;
use boring::ssl::{SslConnector, SslSession};
use http::HeaderMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use url::Url;

/// How long a resolved address list stays usable.
const DNS_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct TlsShare {
    /// Bumped whenever the connector is dropped.
    generation: u64,
    connector: Option<SslConnector>,
    /// Keyed by `host:port`. Only valid for the connector above.
    sessions: HashMap<String, SslSession>,
}

impl std::fmt::Debug for TlsShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsShare")
            .field("generation", &self.generation)
            .field("connector", &self.connector.is_some())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Locks guarding the cross-transfer state.
#[derive(Debug)]
pub struct ShareLocks {
    cookies: Mutex<CookieMonster>,
    dns: Mutex<HashMap<String, (Vec<SocketAddr>, Instant)>>,
    tls: Mutex<TlsShare>,
    share: Mutex<()>,
    connect: tokio::sync::Mutex<()>,
}

impl Default for ShareLocks {
    fn default() -> Self {
        Self::new(CookieMonster::new())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ShareLocks {
    pub fn new(cookies: CookieMonster) -> Self {
        Self {
            cookies: Mutex::new(cookies),
            dns: Mutex::new(HashMap::new()),
            tls: Mutex::new(TlsShare::default()),
            share: Mutex::new(()),
            connect: tokio::sync::Mutex::new(()),
        }
    }

    /// Handle onto the cookie jar.
    pub fn cookies(&self) -> CookieMonster {
        lock(&self.cookies).clone()
    }

    /// `Cookie` header value for a request to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        lock(&self.cookies).cookie_header_for_url(url)
    }

    /// Store the `Set-Cookie` headers of a response from `url`.
    pub fn store_cookies(&self, url: &Url, headers: &HeaderMap) -> usize {
        lock(&self.cookies).set_cookies_from_headers(url, headers)
    }

    pub fn clear_cookies(&self) {
        lock(&self.cookies).clear();
    }

    /// Resolve `peer`, reusing a fresh cached answer.
    pub async fn resolve(
        &self,
        peer: Peer<'_>,
        timeout: Option<Duration>,
    ) -> Result<Vec<SocketAddr>, NetError> {
        let (host, port) = (peer.host(), peer.port());
        let key = format!("{}:{}", host.to_ascii_lowercase(), port);
        if let Some((addrs, at)) = lock(&self.dns).get(&key) {
            if at.elapsed() < DNS_CACHE_TTL {
                return Ok(addrs.clone());
            }
        }

        let lookup = tokio::net::lookup_host((host, port));
        let addrs: Vec<SocketAddr> = match timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| NetError::TimedOut)?
                .dns_context(peer)?
                .collect(),
            None => lookup.await.dns_context(peer)?.collect(),
        };
        if addrs.is_empty() {
            return Err(peer.not_resolved());
        }

        tracing::debug!(%peer, count = addrs.len(), "resolved");
        lock(&self.dns).insert(key, (addrs.clone(), Instant::now()));
        Ok(addrs)
    }

    pub fn clear_dns_cache(&self) {
        lock(&self.dns).clear();
    }

    /// The TLS connector and its generation, built on first use from the
    /// current trust material.
    pub fn tls_connector(
        &self,
        config: &TlsConfig,
        trust: &TrustStore,
    ) -> Result<(SslConnector, u64), NetError> {
        let mut tls = lock(&self.tls);
        if let Some(connector) = &tls.connector {
            return Ok((connector.clone(), tls.generation));
        }
        let connector = config.connector(trust)?;
        tls.connector = Some(connector.clone());
        Ok((connector, tls.generation))
    }

    /// Drop the connector and every session; called when trust material changes.
    pub fn invalidate_tls(&self) {
        let mut tls = lock(&self.tls);
        tls.generation += 1;
        tls.connector = None;
        tls.sessions.clear();
    }

    /// A resumable session for `authority` created by connector `generation`.
    pub fn tls_session(&self, authority: &str, generation: u64) -> Option<SslSession> {
        let tls = lock(&self.tls);
        if tls.generation != generation {
            return None;
        }
        tls.sessions.get(authority).cloned()
    }

    /// Sessions from a connector that has since been dropped are discarded.
    pub fn store_tls_session(&self, authority: &str, generation: u64, session: SslSession) {
        let mut tls = lock(&self.tls);
        if tls.generation == generation {
            tls.sessions.insert(authority.to_string(), session);
        }
    }

    /// Generic lock for callers that need to serialize against transfers.
    pub fn share_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.share)
    }

    /// Serializes connection setup when one connect at a time is wanted.
    pub async fn connect_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.connect.lock().await
    }
}
