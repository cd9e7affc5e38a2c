//! `file:` and `data:` loads, answered without touching the network.

use crate::base::neterror::NetError;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::io;
use url::Url;

/// A synthesized response for a local URL.
#[derive(Debug, Clone)]
pub struct LocalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl LocalResponse {
    fn new(content_type: &str, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status: StatusCode::OK,
            headers,
            body,
        }
    }
}

pub fn is_local_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "file" | "data")
}

pub async fn load(url: &Url) -> Result<LocalResponse, NetError> {
    match url.scheme() {
        "file" => load_file(url).await,
        "data" => parse_data_url(url.as_str()),
        _ => Err(NetError::UnknownUrlScheme),
    }
}

async fn load_file(url: &Url) -> Result<LocalResponse, NetError> {
    let path = url.to_file_path().map_err(|_| NetError::InvalidUrl)?;
    let body = tokio::fs::read(&path).await.map_err(|e| {
        tracing::debug!(path = %path.display(), error = %e, "file load failed");
        match e.kind() {
            io::ErrorKind::NotFound => NetError::FileNotFound,
            io::ErrorKind::PermissionDenied => NetError::AccessDenied,
            _ => NetError::FileNotFound,
        }
    })?;
    let mime = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(mime_for_extension)
        .unwrap_or("application/octet-stream");
    Ok(LocalResponse::new(mime, Bytes::from(body)))
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "text/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// `data:[<mediatype>][;base64],<data>` per RFC 2397.
pub fn parse_data_url(input: &str) -> Result<LocalResponse, NetError> {
    let rest = input
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &input[5..])
        .ok_or(NetError::InvalidUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(NetError::InvalidUrl)?;

    let (media, is_base64) = match meta.rsplit_once(';') {
        Some((media, flag)) if flag.trim().eq_ignore_ascii_case("base64") => (media, true),
        _ => (meta, false),
    };
    let media = media.trim();
    let content_type = if media.is_empty() {
        "text/plain;charset=US-ASCII".to_string()
    } else if media.starts_with(';') {
        format!("text/plain{media}")
    } else {
        media.to_string()
    };

    let decoded = percent_decode(payload);
    let body = if is_base64 {
        let compact: Vec<u8> = decoded
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|_| NetError::InvalidUrl)?
    } else {
        decoded
    };

    Ok(LocalResponse::new(&content_type, Bytes::from(body)))
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_data_url() {
        let r = parse_data_url("data:,Hello%2C%20World!").unwrap();
        assert_eq!(r.body, Bytes::from_static(b"Hello, World!"));
        assert_eq!(r.headers[CONTENT_TYPE], "text/plain;charset=US-ASCII");
        assert_eq!(r.headers[CONTENT_LENGTH], "13");
    }

    #[test]
    fn test_base64_data_url() {
        let r = parse_data_url("data:text/html;base64,PGI+aGk8L2I+").unwrap();
        assert_eq!(r.body, Bytes::from_static(b"<b>hi</b>"));
        assert_eq!(r.headers[CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_charset_only() {
        let r = parse_data_url("data:;charset=utf-8,x").unwrap();
        assert_eq!(r.headers[CONTENT_TYPE], "text/plain;charset=utf-8");
    }

    #[test]
    fn test_bad_data_urls() {
        assert!(parse_data_url("data:text/plain").is_err());
        assert!(parse_data_url("data:;base64,@@@").is_err());
        assert!(parse_data_url("http://x/").is_err());
    }

    #[test]
    fn test_percent_decode_edges() {
        assert_eq!(percent_decode("%41%4"), b"A%4".to_vec());
        assert_eq!(percent_decode("%zz"), b"%zz".to_vec());
    }

    #[tokio::test]
    async fn test_file_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, b"<p>x</p>").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let r = load(&url).await.unwrap();
        assert_eq!(r.body.as_ref(), b"<p>x</p>");
        assert_eq!(r.headers[CONTENT_TYPE], "text/html");

        let missing = Url::from_file_path(dir.path().join("nope.txt")).unwrap();
        assert_eq!(load(&missing).await.unwrap_err(), NetError::FileNotFound);
    }
}
