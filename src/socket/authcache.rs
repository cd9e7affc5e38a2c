//! Credential cache for origin and proxy authentication.
//!
//! Based on Chromium's HttpAuthCache. Origin credentials are keyed by
//! (host, port, realm); proxy credentials by (proxy host, port) alone.
//! The cache lives as long as the loader context that owns it.

use crate::http::authchallenge::{AuthScheme, Credential};
use dashmap::DashMap;
use std::sync::Arc;

/// Cached credentials and the scheme they were accepted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    pub scheme: AuthScheme,
    pub realm: String,
    pub credential: Credential,
}

impl AuthEntry {
    pub fn new(scheme: AuthScheme, realm: impl Into<String>, credential: Credential) -> Self {
        Self {
            scheme,
            realm: realm.into(),
            credential,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct OriginKey {
    host: String,
    port: u16,
    realm: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ProxyKey {
    host: String,
    port: u16,
}

/// Thread-safe authentication cache.
#[derive(Debug, Clone, Default)]
pub struct AuthCache {
    origins: Arc<DashMap<OriginKey, AuthEntry>>,
    proxies: Arc<DashMap<ProxyKey, AuthEntry>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn origin_key(host: &str, port: u16, realm: &str) -> OriginKey {
        OriginKey {
            host: host.to_ascii_lowercase(),
            port,
            realm: realm.to_string(),
        }
    }

    fn proxy_key(host: &str, port: u16) -> ProxyKey {
        ProxyKey {
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    pub fn lookup(&self, host: &str, port: u16, realm: &str) -> Option<AuthEntry> {
        self.origins
            .get(&Self::origin_key(host, port, realm))
            .map(|e| e.clone())
    }

    pub fn store(&self, host: &str, port: u16, entry: AuthEntry) {
        let key = Self::origin_key(host, port, &entry.realm);
        self.origins.insert(key, entry);
    }

    /// Forget credentials for one realm, e.g. after the server rejected them.
    pub fn remove(&self, host: &str, port: u16, realm: &str) -> bool {
        self.origins
            .remove(&Self::origin_key(host, port, realm))
            .is_some()
    }

    /// Remove credentials for a host (all realms).
    pub fn remove_host(&self, host: &str, port: u16) {
        let host = host.to_ascii_lowercase();
        self.origins.retain(|k, _| !(k.host == host && k.port == port));
    }

    pub fn lookup_proxy(&self, host: &str, port: u16) -> Option<AuthEntry> {
        self.proxies
            .get(&Self::proxy_key(host, port))
            .map(|e| e.clone())
    }

    pub fn store_proxy(&self, host: &str, port: u16, entry: AuthEntry) {
        self.proxies.insert(Self::proxy_key(host, port), entry);
    }

    pub fn remove_proxy(&self, host: &str, port: u16) -> bool {
        self.proxies.remove(&Self::proxy_key(host, port)).is_some()
    }

    pub fn clear(&self) {
        self.origins.clear();
        self.proxies.clear();
    }

    pub fn len(&self) -> usize {
        self.origins.len() + self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(realm: &str, user: &str) -> AuthEntry {
        AuthEntry::new(AuthScheme::Basic, realm, Credential::new(user, "pw"))
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = AuthCache::new();
        cache.store("Example.COM", 443, basic("Realm", "user"));

        let found = cache.lookup("example.com", 443, "Realm").unwrap();
        assert_eq!(found.credential.username, "user");
        assert!(cache.lookup("example.com", 80, "Realm").is_none());
        assert!(cache.lookup("example.com", 443, "realm").is_none());
    }

    #[test]
    fn test_realms_are_separate() {
        let cache = AuthCache::new();
        cache.store("h", 80, basic("R1", "u1"));
        cache.store("h", 80, basic("R2", "u2"));
        assert_eq!(cache.lookup("h", 80, "R1").unwrap().credential.username, "u1");
        assert_eq!(cache.lookup("h", 80, "R2").unwrap().credential.username, "u2");

        assert!(cache.remove("h", 80, "R1"));
        assert!(cache.lookup("h", 80, "R1").is_none());
    }

    #[test]
    fn test_remove_host() {
        let cache = AuthCache::new();
        cache.store("a.com", 80, basic("R1", "u"));
        cache.store("a.com", 80, basic("R2", "u"));
        cache.store("b.com", 80, basic("R1", "u"));

        cache.remove_host("a.com", 80);
        assert!(cache.lookup("a.com", 80, "R1").is_none());
        assert!(cache.lookup("b.com", 80, "R1").is_some());
    }

    #[test]
    fn test_proxy_keyed_without_realm() {
        let cache = AuthCache::new();
        cache.store_proxy("proxy", 3128, basic("anything", "p"));
        assert_eq!(cache.lookup_proxy("PROXY", 3128).unwrap().credential.username, "p");
        assert!(cache.lookup("proxy", 3128, "anything").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
