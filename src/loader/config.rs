//! Loader configuration, loadable from JSON.

use crate::http::authchallenge::Credential;
use crate::http::httpcache::CacheConfig;
use crate::socket::proxy::{ProxySettings, ProxyType};
use crate::socket::proxyfilter::ProxyFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where redirects are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// The manager re-homes the job and tells the client.
    #[default]
    Internal,
    /// The transport follows redirects itself.
    Native,
}

/// A configured proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub username: Option<String>,
    #[serde(with = "secret")]
    pub password: Zeroizing<String>,
    /// Bypass list, e.g. `"localhost, .internal, 10.0.0.0/8"`.
    pub bypass: String,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16, proxy_type: ProxyType) -> Self {
        Self {
            host: host.into(),
            port,
            proxy_type,
            ..Self::default()
        }
    }

    pub fn to_settings(&self) -> ProxySettings {
        let port = if self.port == 0 {
            self.proxy_type.default_port()
        } else {
            self.port
        };
        let mut settings = ProxySettings::new(self.host.clone(), port, self.proxy_type)
            .with_filter(ProxyFilter::parse(&self.bypass));
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            settings = settings.with_credential(Credential::new(user, self.password.as_str()));
        }
        settings
    }
}

mod secret {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(value: &Zeroizing<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Zeroizing<String>, D::Error> {
        String::deserialize(d).map(Zeroizing::new)
    }
}

/// Everything the loader context needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub cache: CacheConfig,
    pub proxy: Option<ProxyConfig>,
    /// 0 means unbounded.
    pub max_http_connections: usize,
    pub max_websocket_connections: usize,
    /// Extra slots only diagnostic-priority jobs may use.
    pub reserved_connections: usize,
    /// Timeouts in milliseconds; 0 disables.
    pub dns_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// `None` sends no `Accept-Encoding` and decodes nothing.
    pub accept_encoding: Option<String>,
    pub do_not_track: bool,
    pub redirect_mode: RedirectMode,
    pub max_redirects: u32,
    pub pump_interval_ms: u64,
    /// Ask the admission policy before each network job.
    pub site_filter: bool,
    pub single_connect_per_proxy_host: bool,
    pub cookie_jar_path: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub verify_peer: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            proxy: None,
            max_http_connections: 6,
            max_websocket_connections: 6,
            reserved_connections: 2,
            dns_timeout_ms: 0,
            connect_timeout_ms: 30_000,
            response_timeout_ms: 0,
            accept_encoding: Some("gzip, deflate, br".to_string()),
            do_not_track: false,
            redirect_mode: RedirectMode::Internal,
            max_redirects: 20,
            pump_interval_ms: 50,
            site_filter: false,
            single_connect_per_proxy_host: false,
            cookie_jar_path: None,
            user_agent: None,
            verify_peer: true,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn dns_timeout(&self) -> Option<Duration> {
        millis(self.dns_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        millis(self.response_timeout_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }
}
