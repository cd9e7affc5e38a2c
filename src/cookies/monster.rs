use crate::cookies::canonical_cookie::CanonicalCookie;
use dashmap::DashMap;
use http::header::SET_COOKIE;
use http::HeaderMap;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// Maximum cookies per domain (Chromium default).
const MAX_COOKIES_PER_DOMAIN: usize = 50;

/// Maximum total cookies.
const MAX_COOKIES_TOTAL: usize = 3000;

/// The cookie jar. Modeled after Chromium's `net::CookieMonster`.
///
/// Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct CookieMonster {
    // Keyed by cookie domain.
    store: Arc<DashMap<String, Vec<CanonicalCookie>>>,
}

impl CookieMonster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie (same name, domain and path).
    pub fn set_canonical_cookie(&self, cookie: CanonicalCookie) {
        let mut entry = self.store.entry(cookie.domain.clone()).or_default();
        entry.retain(|c| c.name != cookie.name || c.path != cookie.path);

        while entry.len() >= MAX_COOKIES_PER_DOMAIN {
            match entry
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.last_access_time)
                .map(|(i, _)| i)
            {
                Some(oldest) => {
                    entry.remove(oldest);
                }
                None => break,
            }
        }

        entry.push(cookie);
        drop(entry);

        self.enforce_global_limit();
    }

    fn enforce_global_limit(&self) {
        while self.total_cookie_count() > MAX_COOKIES_TOTAL {
            let mut oldest: Option<(String, usize, OffsetDateTime)> = None;
            for entry in self.store.iter() {
                for (idx, cookie) in entry.value().iter().enumerate() {
                    if oldest
                        .as_ref()
                        .map_or(true, |(_, _, t)| cookie.last_access_time < *t)
                    {
                        oldest = Some((entry.key().clone(), idx, cookie.last_access_time));
                    }
                }
            }

            let Some((domain, idx, _)) = oldest else { break };
            if let Some(mut entry) = self.store.get_mut(&domain) {
                if idx < entry.len() {
                    entry.remove(idx);
                }
            }
        }
    }

    /// Parse and store one `Set-Cookie` line. Returns false when rejected.
    ///
    /// A cookie that arrives already expired deletes any stored cookie it
    /// would have replaced.
    pub fn set_cookie_from_header(&self, url: &Url, line: &str) -> bool {
        let now = OffsetDateTime::now_utc();
        let Some(cookie) = CanonicalCookie::from_set_cookie(url, line, now) else {
            tracing::debug!(url = %url, "rejected Set-Cookie");
            return false;
        };

        if cookie.is_expired(now) {
            if let Some(mut entry) = self.store.get_mut(&cookie.domain) {
                entry.retain(|c| c.name != cookie.name || c.path != cookie.path);
            }
            return true;
        }

        self.set_canonical_cookie(cookie);
        true
    }

    /// Ingest every `Set-Cookie` header of a response. Returns the number accepted.
    pub fn set_cookies_from_headers(&self, url: &Url, headers: &HeaderMap) -> usize {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter(|line| self.set_cookie_from_header(url, line))
            .count()
    }

    /// Cookies to send to `url`, longest path first then oldest first.
    pub fn get_cookies_for_url(&self, url: &Url) -> Vec<CanonicalCookie> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let host = host.to_ascii_lowercase();
        let secure = url.scheme() == "https";
        let now = OffsetDateTime::now_utc();

        let mut result = Vec::new();
        for domain in Self::candidate_domains(&host) {
            let Some(mut entry) = self.store.get_mut(&domain) else {
                continue;
            };
            entry.retain(|c| !c.is_expired(now));
            for cookie in entry.iter_mut() {
                if !cookie.matches_host(&host)
                    || !cookie.matches_path(url.path())
                    || (cookie.secure && !secure)
                {
                    continue;
                }
                cookie.last_access_time = now;
                result.push(cookie.clone());
            }
        }

        result.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.creation_time.cmp(&b.creation_time))
        });
        result
    }

    /// `Cookie` request header value for `url`, if any cookie applies.
    pub fn cookie_header_for_url(&self, url: &Url) -> Option<String> {
        let cookies = self.get_cookies_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// The host and each parent domain above it.
    fn candidate_domains(host: &str) -> Vec<String> {
        let mut domains = vec![host.to_string()];
        let mut rest = host;
        while let Some((_, parent)) = rest.split_once('.') {
            if parent.is_empty() {
                break;
            }
            domains.push(parent.to_string());
            rest = parent;
        }
        domains
    }

    pub fn total_cookie_count(&self) -> usize {
        self.store.iter().map(|e| e.value().len()).sum()
    }

    /// Drop expired cookies. Returns how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut removed = 0;
        for mut entry in self.store.iter_mut() {
            let before = entry.len();
            entry.retain(|c| !c.is_expired(now));
            removed += before - entry.len();
        }
        self.store.retain(|_, v| !v.is_empty());
        removed
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Snapshot of every stored cookie.
    pub fn iter_all_cookies(&self) -> impl Iterator<Item = CanonicalCookie> + '_ {
        self.store
            .iter()
            .flat_map(|entry| entry.value().clone().into_iter())
    }
}
