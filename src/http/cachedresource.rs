//! A single cached HTTP response: metadata, freshness and validators.
//!
//! Chromium mapping: net/http/http_response_headers.cc (freshness lifetime)
//!
//! Times are stored as seconds since the UNIX epoch in `f64`, which is also
//! how they are laid out in the on-disk index.

use crate::http::response::{split_content_type, ResourceResponse};
use http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use url::Url;

/// `flags` bit: response carried `must-revalidate`.
pub const FLAG_MUST_REVALIDATE: u32 = 1 << 0;
/// `flags` bit: response carried `no-cache` (or `Pragma: no-cache`).
pub const FLAG_NO_CACHE: u32 = 1 << 1;

/// Parsed Cache-Control directives relevant to storage and freshness.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub max_age: Option<u64>,
}

/// Parse Cache-Control (and the legacy `Pragma: no-cache`).
pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();

            if directive == "no-store" {
                cc.no_store = true;
            } else if directive == "no-cache" {
                cc.no_cache = true;
            } else if directive == "must-revalidate" {
                cc.must_revalidate = true;
            } else if let Some(age) = directive.strip_prefix("max-age=") {
                if let Ok(age) = age.trim_matches('"').parse::<u64>() {
                    cc.max_age = Some(age);
                }
            }
        }
    }

    if headers
        .get(header::PRAGMA)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("no-cache"))
    {
        cc.no_cache = true;
    }

    cc
}

/// Statuses the cache stores: 2xx except partial content, plus permanent redirects.
pub fn is_cacheable_status(status: StatusCode) -> bool {
    (status.is_success() && status != StatusCode::PARTIAL_CONTENT)
        || status == StatusCode::MOVED_PERMANENTLY
        || status == StatusCode::PERMANENT_REDIRECT
}

pub(crate) fn unix_seconds(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<f64> {
    let value = headers.get(name)?.to_str().ok()?;
    OffsetDateTime::parse(value.trim(), &Rfc2822)
        .ok()
        .map(|t| t.unix_timestamp() as f64)
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Strip the fragment: cache entries are keyed by everything before `#`.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.to_string()
}

/// Metadata of one cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCachedResource {
    pub(crate) url: String,
    pub(crate) mime_type: String,
    pub(crate) encoding: String,
    pub(crate) status: u16,
    pub(crate) flags: u32,
    /// 10 for HTTP/1.0, 11 for HTTP/1.1, 20 for HTTP/2.
    pub(crate) http_version: u32,
    pub(crate) content_length: u64,
    pub(crate) expected_content_length: u64,
    pub(crate) max_age: Option<f64>,
    pub(crate) expires: Option<f64>,
    pub(crate) date: Option<f64>,
    pub(crate) last_modified: Option<f64>,
    pub(crate) file_name: String,
    pub(crate) suffix_file_name: String,
    pub(crate) last_modified_header: String,
    pub(crate) etag: String,
    /// Second-chance bit for eviction; never persisted.
    pub(crate) used: bool,
}

impl HttpCachedResource {
    /// Build an entry from a response head.
    ///
    /// `now` stands in for a missing `Date` header so the entry still ages.
    pub fn from_response(
        url: &Url,
        status: StatusCode,
        version: Version,
        headers: &HeaderMap,
        now: SystemTime,
    ) -> Self {
        let cc = parse_cache_control(headers);
        let mut flags = 0;
        if cc.must_revalidate {
            flags |= FLAG_MUST_REVALIDATE;
        }
        if cc.no_cache {
            flags |= FLAG_NO_CACHE;
        }

        let (mime_type, encoding) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(split_content_type)
            .unwrap_or_default();

        let expected_content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        let suffix_file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("")
            .to_string();

        Self {
            url: cache_key(url),
            mime_type,
            encoding,
            status: status.as_u16(),
            flags,
            http_version: encode_version(version),
            content_length: 0,
            expected_content_length,
            max_age: cc.max_age.map(|a| a as f64),
            expires: header_date(headers, header::EXPIRES),
            date: header_date(headers, header::DATE).or(Some(unix_seconds(now))),
            last_modified: header_date(headers, header::LAST_MODIFIED),
            file_name: String::new(),
            suffix_file_name,
            last_modified_header: header_string(headers, header::LAST_MODIFIED),
            etag: header_string(headers, header::ETAG),
            used: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn etag(&self) -> Option<&str> {
        (!self.etag.is_empty()).then_some(self.etag.as_str())
    }

    pub fn last_modified_header(&self) -> Option<&str> {
        (!self.last_modified_header.is_empty()).then_some(self.last_modified_header.as_str())
    }

    pub fn must_revalidate(&self) -> bool {
        self.flags & FLAG_MUST_REVALIDATE != 0
    }

    pub fn no_cache(&self) -> bool {
        self.flags & FLAG_NO_CACHE != 0
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Freshness lifetime in seconds.
    ///
    /// `max-age` wins; then `Expires - Date`; then a tenth of the time since
    /// `Last-Modified`; otherwise zero.
    pub fn freshness_lifetime(&self) -> f64 {
        if let Some(max_age) = self.max_age {
            return max_age.max(0.0);
        }
        match (self.expires, self.date, self.last_modified) {
            (Some(expires), Some(date), _) => (expires - date).max(0.0),
            (None, Some(date), Some(modified)) if date > modified => 0.1 * (date - modified),
            _ => 0.0,
        }
    }

    /// Expired once the age reaches the lifetime.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let age = match self.date {
            Some(date) => unix_seconds(now) - date,
            None => return true,
        };
        age >= self.freshness_lifetime()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    pub fn needs_revalidate_at(&self, now: SystemTime) -> bool {
        self.must_revalidate() || self.no_cache() || self.is_expired_at(now)
    }

    pub fn needs_revalidate(&self) -> bool {
        self.needs_revalidate_at(SystemTime::now())
    }

    /// True if a conditional request can be built from this entry.
    pub fn has_validator(&self) -> bool {
        !self.etag.is_empty() || !self.last_modified_header.is_empty()
    }

    /// `If-None-Match` / `If-Modified-Since` for revalidating this entry.
    pub fn conditional_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(etag) = self.etag().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::IF_NONE_MATCH, etag);
        }
        if let Some(lm) = self
            .last_modified_header()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::IF_MODIFIED_SINCE, lm);
        }
        headers
    }

    /// Refresh freshness inputs and validators from a 304 response.
    pub fn update_from_revalidation(&mut self, headers: &HeaderMap, now: SystemTime) {
        let cc = parse_cache_control(headers);
        if headers.contains_key(header::CACHE_CONTROL) {
            self.max_age = cc.max_age.map(|a| a as f64);
            self.flags = 0;
            if cc.must_revalidate {
                self.flags |= FLAG_MUST_REVALIDATE;
            }
            if cc.no_cache {
                self.flags |= FLAG_NO_CACHE;
            }
        }
        if let Some(expires) = header_date(headers, header::EXPIRES) {
            self.expires = Some(expires);
        }
        self.date = header_date(headers, header::DATE).or(Some(unix_seconds(now)));
        if headers.contains_key(header::ETAG) {
            self.etag = header_string(headers, header::ETAG);
        }
        if headers.contains_key(header::LAST_MODIFIED) {
            self.last_modified_header = header_string(headers, header::LAST_MODIFIED);
            self.last_modified = header_date(headers, header::LAST_MODIFIED);
        }
    }

    /// Rebuild a response head for serving this entry.
    pub fn to_response(&self, url: Url) -> ResourceResponse {
        let mut headers = HeaderMap::new();
        if !self.mime_type.is_empty() {
            let content_type = if self.encoding.is_empty() {
                self.mime_type.clone()
            } else {
                format!("{}; charset={}", self.mime_type, self.encoding)
            };
            if let Ok(v) = HeaderValue::from_str(&content_type) {
                headers.insert(header::CONTENT_TYPE, v);
            }
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.content_length));
        if let Some(v) = self.etag().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::ETAG, v);
        }
        if let Some(v) = self
            .last_modified_header()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::LAST_MODIFIED, v);
        }

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response =
            ResourceResponse::new(url, status, decode_version(self.http_version), headers);
        response.set_expected_content_length(Some(self.content_length));
        response.mark_from_cache()
    }

    /// Bytes this entry occupies in the index file.
    pub fn index_record_size(&self) -> u64 {
        // two u64, three u32, four f64
        let fixed = 8 * 2 + 4 * 3 + 8 * 4;
        let strings: u64 = [
            &self.url,
            &self.mime_type,
            &self.encoding,
            &self.file_name,
            &self.suffix_file_name,
            &self.last_modified_header,
            &self.etag,
        ]
        .iter()
        .map(|s| 4 + padded_len(s.len()) as u64)
        .sum();
        fixed + strings
    }
}

/// Round up to the next multiple of four.
pub(crate) fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

pub(crate) fn encode_version(version: Version) -> u32 {
    match version {
        Version::HTTP_09 => 9,
        Version::HTTP_10 => 10,
        Version::HTTP_2 => 20,
        Version::HTTP_3 => 30,
        _ => 11,
    }
}

pub(crate) fn decode_version(code: u32) -> Version {
    match code {
        9 => Version::HTTP_09,
        10 => Version::HTTP_10,
        20 => Version::HTTP_2,
        30 => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

/// Whether a request method may be served from or stored into the cache.
pub fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET
}
