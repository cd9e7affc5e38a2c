//! Response metadata handed to loader clients.

use http::{header, HeaderMap, StatusCode, Version};
use url::Url;

/// Response head as seen by a [`ResourceHandleClient`](crate::loader::ResourceHandleClient).
///
/// The body is delivered separately through `did_receive_data`.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    url: Url,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    mime_type: String,
    text_encoding: String,
    expected_content_length: Option<u64>,
    suggested_filename: Option<String>,
    from_cache: bool,
}

impl ResourceResponse {
    /// Build from a received response head.
    pub fn new(url: Url, status: StatusCode, version: Version, headers: HeaderMap) -> Self {
        let (mime_type, text_encoding) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(split_content_type)
            .unwrap_or_default();

        let expected_content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());

        let suggested_filename = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);

        Self {
            url,
            status,
            version,
            headers,
            mime_type,
            text_encoding,
            expected_content_length,
            suggested_filename,
            from_cache: false,
        }
    }

    pub(crate) fn mark_from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    pub(crate) fn set_expected_content_length(&mut self, length: Option<u64>) {
        self.expected_content_length = length;
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// MIME type without parameters, lowercased.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// `charset` parameter of Content-Type, if any.
    pub fn text_encoding(&self) -> &str {
        &self.text_encoding
    }

    pub fn expected_content_length(&self) -> Option<u64> {
        self.expected_content_length
    }

    pub fn suggested_filename(&self) -> Option<&str> {
        self.suggested_filename.as_deref()
    }

    /// True when the response was served from the disk cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Redirect target, resolved against the response URL.
    pub fn location(&self) -> Option<Url> {
        let value = self.headers.get(header::LOCATION)?.to_str().ok()?;
        self.url.join(value.trim()).ok()
    }
}

/// Split `text/html; charset=UTF-8` into (`text/html`, `UTF-8`).
pub(crate) fn split_content_type(value: &str) -> (String, String) {
    let mut parts = value.split(';');
    let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let charset = parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .unwrap_or_default();
    (mime, charset)
}

fn filename_from_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}
