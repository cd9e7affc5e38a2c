use crate::http::authchallenge::Credential;
use crate::http::formdata::FormData;
use http::header::{HeaderName, HeaderValue, UPGRADE};
use http::{HeaderMap, Method};
use url::Url;

/// What the request is for, as far as the site filter cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Composition {
    MainDocument,
    Subresource,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Fresh entries are served, stale ones revalidated.
    #[default]
    UseProtocolCachePolicy,
    /// Always go to the network, without validators.
    ReloadIgnoringCache,
    /// Any stored entry is served, fresh or not.
    ReturnCacheDataElseLoad,
    /// Serve from cache or fail with a cache miss.
    ReturnCacheDataDontLoad,
}

/// Diagnostic jobs may use the reserved connection slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    Diagnostic,
}

/// Groups jobs for `cancel_by_owner`, e.g. one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

/// A request as submitted by the embedder.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<FormData>,
    pub credential: Option<Credential>,
    pub cache_policy: CachePolicy,
    pub composition: Composition,
    pub priority: Priority,
    pub owner: Option<OwnerId>,
}

impl ResourceRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            credential: None,
            cache_policy: CachePolicy::default(),
            composition: Composition::default(),
            priority: Priority::default(),
            owner: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<FormData>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// WebSocket handshakes count against their own connection ceiling.
    pub fn is_websocket(&self) -> bool {
        matches!(self.url.scheme(), "ws" | "wss")
            || self
                .headers
                .get(UPGRADE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// Host and port used for per-host accounting.
    pub(crate) fn host_port(&self) -> Option<(String, u16)> {
        Some((
            self.url.host_str()?.to_ascii_lowercase(),
            self.url.port_or_known_default()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let req = ResourceRequest::get(Url::parse("https://example.com/x").unwrap())
            .with_composition(Composition::MainDocument)
            .with_owner(OwnerId(3));
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.cache_policy, CachePolicy::UseProtocolCachePolicy);
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.owner, Some(OwnerId(3)));
        assert_eq!(req.host_port(), Some(("example.com".to_string(), 443)));
    }

    #[test]
    fn test_websocket_detection() {
        let plain = ResourceRequest::get(Url::parse("http://e.com/").unwrap());
        assert!(!plain.is_websocket());
        let upgrade = plain.with_header(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(upgrade.is_websocket());
    }
}
