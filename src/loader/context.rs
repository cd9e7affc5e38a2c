use crate::base::neterror::NetError;
use crate::cookies::monster::CookieMonster;
use crate::cookies::persistence;
use crate::http::httpcache::HttpCache;
use crate::loader::config::LoaderConfig;
use crate::loader::manager::ResourceHandleManager;
use crate::socket::tls::TlsConfig;
use crate::tls::truststore::TrustStore;
use crate::transport::share::ShareLocks;
use crate::transport::HyperTransport;
use std::sync::Arc;

/// One running loader: configuration, shared state, transport and cache.
///
/// Nothing is global; two contexts never share cookies, credentials or
/// cache.
#[derive(Debug)]
pub struct LoaderContext {
    manager: ResourceHandleManager<HyperTransport>,
}

impl LoaderContext {
    /// Load persisted cookies, open the cache and start the transport.
    ///
    /// A cache that cannot be opened is replaced by a disabled one.
    pub fn start(config: LoaderConfig) -> Result<Self, NetError> {
        let cookies = CookieMonster::new();
        if let Some(path) = &config.cookie_jar_path {
            match persistence::load_cookies_into(&cookies, path) {
                Ok(count) => tracing::info!(path = %path.display(), count, "cookies loaded"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "cookie jar unreadable"),
            }
        }
        let share = Arc::new(ShareLocks::new(cookies));
        let trust = TrustStore::new();
        let transport = HyperTransport::new(share, TlsConfig::default(), trust.clone())?;

        let cache = if config.cache.enabled {
            match HttpCache::open(config.cache.clone()) {
                Ok(cache) => cache,
                Err(e) => {
                    tracing::warn!(dir = %config.cache.directory.display(), error = %e, "cache unavailable, continuing without");
                    HttpCache::disabled()
                }
            }
        } else {
            HttpCache::disabled()
        };

        tracing::info!(
            cache = cache.is_enabled(),
            max_connections = config.max_http_connections,
            proxy = config.proxy.is_some(),
            "loader started"
        );
        Ok(Self {
            manager: ResourceHandleManager::new(config, transport, cache, trust),
        })
    }

    pub fn manager(&self) -> &ResourceHandleManager<HyperTransport> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ResourceHandleManager<HyperTransport> {
        &mut self.manager
    }

    pub async fn run_until_idle(&mut self) {
        self.manager.run_until_idle().await;
    }

    /// Cancel what is left, flush the cache index and save cookies.
    pub fn shutdown(mut self) {
        let cancelled = self.manager.cancel_all();
        self.manager.pump();
        if let Err(e) = self.manager.cache_mut().flush() {
            tracing::warn!(error = %e, "cache index flush failed at shutdown");
        }
        if let Some(path) = self.manager.config().cookie_jar_path.clone() {
            match persistence::save_cookies(&self.manager.cookies(), &path) {
                Ok(count) => tracing::info!(path = %path.display(), count, "cookies saved"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "cookie jar not saved"),
            }
        }
        tracing::info!(cancelled, "loader shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn test_cookies_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("cookies.json");
        let config = LoaderConfig {
            cookie_jar_path: Some(jar.clone()),
            ..LoaderConfig::default()
        };

        let ctx = LoaderContext::start(config.clone()).unwrap();
        let url = Url::parse("https://example.com/").unwrap();
        assert!(ctx
            .manager()
            .cookies()
            .set_cookie_from_header(&url, "id=42; Max-Age=3600"));
        ctx.shutdown();
        assert!(jar.exists());

        let ctx = LoaderContext::start(config).unwrap();
        assert_eq!(
            ctx.manager().share_locks().cookie_header(&url).as_deref(),
            Some("id=42")
        );
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut config = LoaderConfig::default();
        config.cache.enabled = true;
        config.cache.directory = blocker.join("cache");
        let ctx = LoaderContext::start(config).unwrap();
        assert!(!ctx.manager().cache().is_enabled());
        ctx.shutdown();
    }
}
