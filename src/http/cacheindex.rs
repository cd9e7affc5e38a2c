//! Binary allocation table (`index.fat`) for the disk cache.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [16-byte MD5 of everything after it][u32 version][u32 next file counter]
//! record*:
//!   u64 content length, u64 expected content length
//!   u32 status, u32 flags, u32 http version
//!   f64 max-age, f64 expires, f64 date, f64 last-modified   (NaN = absent)
//!   7 x (u32 byte length + UTF-8 bytes zero-padded to 4):
//!       url, mime, encoding, file name, suffix file name,
//!       Last-Modified header, ETag header
//! ```

use crate::http::cachedresource::{padded_len, HttpCachedResource};
use crate::http::httpcache::CacheError;
use boring::hash::{hash, MessageDigest};
use bytes::{BufMut, BytesMut};

/// Bumped whenever the record layout changes.
pub const INDEX_VERSION: u32 = 3;

const DIGEST_LEN: usize = 16;
/// Digest plus version plus counter.
pub const INDEX_HEADER_LEN: usize = DIGEST_LEN + 4 + 4;

/// Decoded index contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheIndex {
    pub next_counter: u32,
    pub entries: Vec<HttpCachedResource>,
}

fn md5(data: &[u8]) -> Result<[u8; DIGEST_LEN], CacheError> {
    let digest = hash(MessageDigest::md5(), data).map_err(|e| CacheError::Digest(e.to_string()))?;
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&digest[..DIGEST_LEN]);
    Ok(out)
}

fn put_f64(buf: &mut BytesMut, value: Option<f64>) {
    buf.put_f64_le(value.unwrap_or(f64::NAN));
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, padded_len(s.len()) - s.len());
}

/// Serialize the index.
pub fn encode(index: &CacheIndex) -> Result<Vec<u8>, CacheError> {
    let body_len: u64 = index.entries.iter().map(HttpCachedResource::index_record_size).sum();
    let mut body = BytesMut::with_capacity(8 + body_len as usize);

    body.put_u32_le(INDEX_VERSION);
    body.put_u32_le(index.next_counter);

    for entry in &index.entries {
        body.put_u64_le(entry.content_length);
        body.put_u64_le(entry.expected_content_length);
        body.put_u32_le(u32::from(entry.status));
        body.put_u32_le(entry.flags);
        body.put_u32_le(entry.http_version);
        put_f64(&mut body, entry.max_age);
        put_f64(&mut body, entry.expires);
        put_f64(&mut body, entry.date);
        put_f64(&mut body, entry.last_modified);
        for s in [
            &entry.url,
            &entry.mime_type,
            &entry.encoding,
            &entry.file_name,
            &entry.suffix_file_name,
            &entry.last_modified_header,
            &entry.etag,
        ] {
            put_string(&mut body, s);
        }
    }

    let digest = md5(&body)?;
    let mut out = Vec::with_capacity(DIGEST_LEN + body.len());
    out.extend_from_slice(&digest);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Bounds-checked cursor over an index buffer.
struct IndexReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> IndexReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheError> {
        if self.remaining() < n {
            return Err(CacheError::Corrupt(format!(
                "truncated at offset {} (wanted {} bytes, {} left)",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, CacheError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, CacheError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn f64(&mut self) -> Result<Option<f64>, CacheError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        let value = f64::from_le_bytes(raw);
        Ok((!value.is_nan()).then_some(value))
    }

    fn string(&mut self) -> Result<String, CacheError> {
        let len = self.u32()? as usize;
        let raw = self.take(padded_len(len))?;
        String::from_utf8(raw[..len].to_vec())
            .map_err(|_| CacheError::Corrupt(format!("invalid UTF-8 before offset {}", self.pos)))
    }
}

/// Parse and verify an index.
///
/// Fails with [`CacheError::Corrupt`] on checksum mismatch or truncation and
/// [`CacheError::VersionMismatch`] on a layout from another version.
pub fn decode(data: &[u8]) -> Result<CacheIndex, CacheError> {
    if data.len() < INDEX_HEADER_LEN {
        return Err(CacheError::Corrupt(format!(
            "index is {} bytes, header needs {}",
            data.len(),
            INDEX_HEADER_LEN
        )));
    }

    let (stored, body) = data.split_at(DIGEST_LEN);
    if md5(body)?.as_slice() != stored {
        return Err(CacheError::Corrupt("checksum mismatch".into()));
    }

    let mut reader = IndexReader::new(body);
    let version = reader.u32()?;
    if version != INDEX_VERSION {
        return Err(CacheError::VersionMismatch {
            found: version,
            expected: INDEX_VERSION,
        });
    }
    let next_counter = reader.u32()?;

    let mut entries = Vec::new();
    while reader.remaining() > 0 {
        let content_length = reader.u64()?;
        let expected_content_length = reader.u64()?;
        let status = reader.u32()?;
        let flags = reader.u32()?;
        let http_version = reader.u32()?;
        let max_age = reader.f64()?;
        let expires = reader.f64()?;
        let date = reader.f64()?;
        let last_modified = reader.f64()?;

        let status = u16::try_from(status)
            .map_err(|_| CacheError::Corrupt(format!("status {} out of range", status)))?;

        entries.push(HttpCachedResource {
            content_length,
            expected_content_length,
            status,
            flags,
            http_version,
            max_age,
            expires,
            date,
            last_modified,
            url: reader.string()?,
            mime_type: reader.string()?,
            encoding: reader.string()?,
            file_name: reader.string()?,
            suffix_file_name: reader.string()?,
            last_modified_header: reader.string()?,
            etag: reader.string()?,
            used: false,
        });
    }

    Ok(CacheIndex {
        next_counter,
        entries,
    })
}
