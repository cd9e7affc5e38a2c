//! Persistent HTTP response cache.
//!
//! Chromium mapping: net/http/http_cache.h (single-threaded disk variant)
//!
//! Bodies live in `NNNNNNNN.cache` files inside the cache directory; the
//! metadata of every entry is kept in memory and written to `index.fat`
//! lazily through [`HttpCache::flush`]. Entry count, total body bytes and
//! total index bytes are tracked incrementally and checked before each
//! insertion. Eviction is oldest-first among entries whose "used" bit is
//! clear; when that is not enough every bit is cleared and the pass runs
//! again.

use crate::base::neterror::NetError;
use crate::http::cachedresource::{
    cache_key, is_cacheable_method, is_cacheable_status, parse_cache_control, HttpCachedResource,
};
use crate::http::cacheindex::{self, CacheIndex, INDEX_HEADER_LEN};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use url::Url;

/// Index file name inside the cache directory.
pub const INDEX_FILE_NAME: &str = "index.fat";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache is disabled")]
    Disabled,
    #[error("response not cacheable: {0}")]
    NotCacheable(&'static str),
    #[error("entry of {size} bytes exceeds the per-entry limit of {limit}")]
    EntryTooLarge { size: u64, limit: u64 },
    #[error("no room for entry after purging")]
    NoRoom,
    #[error("no cache entry for {0}")]
    Missing(String),
    #[error("cache index corrupt: {0}")]
    Corrupt(String),
    #[error("cache index version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("cache digest failed: {0}")]
    Digest(String),
    #[error("cache body write failed: {0}")]
    Write(std::io::Error),
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for NetError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Missing(_) => NetError::CacheMiss,
            CacheError::Write(e) => NetError::CacheWriteFailed {
                reason: e.to_string(),
            },
            other => NetError::cache_read_failed(other),
        }
    }
}

/// Cache limits and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_entries: usize,
    /// Largest single body accepted.
    pub max_entry_size: u64,
    /// Ceiling on the sum of all body sizes.
    pub max_total_size: u64,
    /// Ceiling on the size of `index.fat`.
    pub max_index_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("netloader-cache"),
            max_entries: 1000,
            max_entry_size: 4 * 1024 * 1024,
            max_total_size: 50 * 1024 * 1024,
            max_index_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    resource: HttpCachedResource,
    /// Insertion order; lower is older.
    sequence: u64,
}

/// Disk-backed response cache.
#[derive(Debug)]
pub struct HttpCache {
    config: CacheConfig,
    entries: HashMap<String, Slot>,
    next_sequence: u64,
    next_counter: u32,
    total_content_size: u64,
    total_index_size: u64,
    dirty: bool,
}

impl HttpCache {
    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self::empty(CacheConfig::default())
    }

    fn empty(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            next_sequence: 0,
            next_counter: 0,
            total_content_size: 0,
            total_index_size: INDEX_HEADER_LEN as u64,
            dirty: false,
        }
    }

    /// Open the cache directory and load its index.
    ///
    /// A corrupt or outdated index wipes the directory and starts empty.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let mut cache = Self::empty(config);
        if !cache.config.enabled {
            return Ok(cache);
        }

        fs::create_dir_all(&cache.config.directory)?;
        let index_path = cache.index_path();
        let data = match fs::read(&index_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cache),
            Err(e) => return Err(e.into()),
        };

        match cacheindex::decode(&data) {
            Ok(index) => {
                cache.next_counter = index.next_counter;
                for resource in index.entries {
                    cache.insert_slot(resource);
                }
                cache.dirty = false;
                tracing::debug!(
                    entries = cache.entries.len(),
                    bytes = cache.total_content_size,
                    "loaded cache index"
                );
            }
            Err(e @ (CacheError::Corrupt(_) | CacheError::VersionMismatch { .. })) => {
                tracing::warn!(
                    dir = %cache.config.directory.display(),
                    error = %e,
                    "cache index unusable, resetting cache directory"
                );
                cache.wipe_directory()?;
            }
            Err(e) => return Err(e),
        }

        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_content_size(&self) -> u64 {
        self.total_content_size
    }

    /// Size `index.fat` would have if flushed now.
    pub fn total_index_size(&self) -> u64 {
        self.total_index_size
    }

    /// True when the in-memory index differs from disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn index_path(&self) -> PathBuf {
        self.config.directory.join(INDEX_FILE_NAME)
    }

    fn body_path(&self, file_name: &str) -> PathBuf {
        self.config.directory.join(file_name)
    }

    /// Look up an entry without touching its used bit.
    pub fn peek(&self, url: &Url) -> Option<&HttpCachedResource> {
        self.entries.get(&cache_key(url)).map(|slot| &slot.resource)
    }

    /// Look up an entry and mark it used.
    pub fn lookup(&mut self, url: &Url) -> Option<&HttpCachedResource> {
        if !self.config.enabled {
            return None;
        }
        let slot = self.entries.get_mut(&cache_key(url))?;
        slot.resource.used = true;
        Some(&slot.resource)
    }

    /// Build an entry for a response, refusing what must not be stored.
    pub fn create_cached_resource(
        &self,
        method: &Method,
        url: &Url,
        status: StatusCode,
        version: Version,
        headers: &HeaderMap,
    ) -> Result<HttpCachedResource, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }
        if !is_cacheable_method(method) {
            return Err(CacheError::NotCacheable("method"));
        }
        if !is_cacheable_status(status) {
            return Err(CacheError::NotCacheable("status"));
        }
        if parse_cache_control(headers).no_store {
            return Err(CacheError::NotCacheable("no-store"));
        }

        let resource =
            HttpCachedResource::from_response(url, status, version, headers, SystemTime::now());
        if resource.expected_content_length > self.config.max_entry_size {
            return Err(CacheError::EntryTooLarge {
                size: resource.expected_content_length,
                limit: self.config.max_entry_size,
            });
        }
        Ok(resource)
    }

    /// Store `body` for `resource`, evicting older entries if needed.
    ///
    /// An existing entry for the same URL is replaced.
    pub fn add_cached_resource(
        &mut self,
        mut resource: HttpCachedResource,
        body: &[u8],
    ) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }

        let size = body.len() as u64;
        if size > self.config.max_entry_size {
            return Err(CacheError::EntryTooLarge {
                size,
                limit: self.config.max_entry_size,
            });
        }

        let key = resource.url.clone();
        self.remove_key(&key);

        resource.content_length = size;
        resource.file_name = format!("{:08}.cache", self.next_counter);
        resource.used = false;

        if !self.make_room(size, resource.index_record_size()) {
            tracing::debug!(url = %key, size, "cache refused entry, ceilings reached");
            return Err(CacheError::NoRoom);
        }

        self.write(&resource, body)?;
        self.next_counter = self.next_counter.wrapping_add(1);
        self.insert_slot(resource);
        tracing::debug!(url = %key, size, entries = self.entries.len(), "cached response");
        Ok(())
    }

    /// Refresh a stored entry after a 304 and return the updated metadata.
    ///
    /// New validators can grow the index record; other entries are evicted to
    /// make room and, failing that, the entry itself is dropped.
    pub fn update_cached_resource(
        &mut self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<HttpCachedResource, CacheError> {
        let key = cache_key(url);
        let Some(mut slot) = self.entries.remove(&key) else {
            return Err(CacheError::Missing(key));
        };
        self.total_content_size -= slot.resource.content_length;
        self.total_index_size -= slot.resource.index_record_size();
        self.dirty = true;

        slot.resource.update_from_revalidation(headers, SystemTime::now());
        slot.resource.used = true;
        let content = slot.resource.content_length;
        let record = slot.resource.index_record_size();

        if !self.make_room(content, record) {
            tracing::debug!(url = %key, record, "revalidated entry no longer fits, dropping it");
            self.delete_body(&slot.resource.file_name);
            return Err(CacheError::NoRoom);
        }

        self.total_content_size += content;
        self.total_index_size += record;
        let updated = slot.resource.clone();
        self.entries.insert(key, slot);
        Ok(updated)
    }

    /// Write the body file of `resource`.
    pub fn write(&self, resource: &HttpCachedResource, body: &[u8]) -> Result<(), CacheError> {
        fs::write(self.body_path(&resource.file_name), body).map_err(CacheError::Write)
    }

    /// Read an entry and its body. A missing or short body file drops the entry.
    pub fn read(&mut self, url: &Url) -> Result<(HttpCachedResource, Bytes), CacheError> {
        let key = cache_key(url);
        let resource = match self.entries.get_mut(&key) {
            Some(slot) => {
                slot.resource.used = true;
                slot.resource.clone()
            }
            None => return Err(CacheError::Missing(key)),
        };

        match fs::read(self.body_path(&resource.file_name)) {
            Ok(body) if body.len() as u64 == resource.content_length => {
                Ok((resource, Bytes::from(body)))
            }
            Ok(body) => {
                self.remove_key(&key);
                Err(CacheError::Corrupt(format!(
                    "body file {} has {} bytes, index says {}",
                    resource.file_name,
                    body.len(),
                    resource.content_length
                )))
            }
            Err(e) => {
                self.remove_key(&key);
                Err(e.into())
            }
        }
    }

    /// Drop one entry. Returns whether it existed.
    pub fn remove(&mut self, url: &Url) -> bool {
        self.remove_key(&cache_key(url))
    }

    /// Drop every entry and its body file.
    pub fn clear(&mut self) {
        let keys: Vec<String> = self.entries.keys().cloned().collect();
        for key in keys {
            self.remove_key(&key);
        }
        self.dirty = true;
    }

    /// Persist the index if it changed.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty || !self.config.enabled {
            return Ok(());
        }

        let mut slots: Vec<&Slot> = self.entries.values().collect();
        slots.sort_by_key(|slot| slot.sequence);
        let index = CacheIndex {
            next_counter: self.next_counter,
            entries: slots.into_iter().map(|slot| slot.resource.clone()).collect(),
        };
        let data = cacheindex::encode(&index)?;

        let tmp = self.config.directory.join(format!("{}.tmp", INDEX_FILE_NAME));
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, self.index_path())?;
        self.dirty = false;
        tracing::debug!(entries = index.entries.len(), bytes = data.len(), "flushed cache index");
        Ok(())
    }

    fn insert_slot(&mut self, resource: HttpCachedResource) {
        self.total_content_size += resource.content_length;
        self.total_index_size += resource.index_record_size();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries
            .insert(resource.url.clone(), Slot { resource, sequence });
        self.dirty = true;
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let Some(slot) = self.entries.remove(key) else {
            return false;
        };
        self.total_content_size -= slot.resource.content_length;
        self.total_index_size -= slot.resource.index_record_size();
        self.dirty = true;
        self.delete_body(&slot.resource.file_name);
        true
    }

    fn delete_body(&self, file_name: &str) {
        let path = self.body_path(file_name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "failed to delete cache body");
            }
        }
    }

    fn fits(&self, content: u64, index: u64) -> bool {
        self.entries.len() < self.config.max_entries
            && self.total_content_size + content <= self.config.max_total_size
            && self.total_index_size + index <= self.config.max_index_size
    }

    /// Evict until an entry of the given sizes fits.
    fn make_room(&mut self, content: u64, index: u64) -> bool {
        // Even an empty cache cannot take it.
        if self.config.max_entries == 0
            || content > self.config.max_total_size
            || INDEX_HEADER_LEN as u64 + index > self.config.max_index_size
        {
            return false;
        }

        for pass in 0..2 {
            while !self.fits(content, index) {
                let victim = self
                    .entries
                    .iter()
                    .filter(|(_, slot)| !slot.resource.used)
                    .min_by_key(|(_, slot)| slot.sequence)
                    .map(|(key, _)| key.clone());
                match victim {
                    Some(key) => {
                        tracing::debug!(url = %key, "evicting cache entry");
                        self.remove_key(&key);
                    }
                    None => break,
                }
            }
            if self.fits(content, index) {
                return true;
            }
            if pass == 0 {
                for slot in self.entries.values_mut() {
                    slot.resource.used = false;
                }
            }
        }
        false
    }

    fn wipe_directory(&mut self) -> Result<(), CacheError> {
        remove_dir_contents(&self.config.directory)?;
        self.entries.clear();
        self.next_counter = 0;
        self.total_content_size = 0;
        self.total_index_size = INDEX_HEADER_LEN as u64;
        self.dirty = false;
        Ok(())
    }
}

fn remove_dir_contents(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            enabled: true,
            directory: dir.to_path_buf(),
            max_entries: 3,
            max_entry_size: 100,
            max_total_size: 250,
            max_index_size: 64 * 1024,
        }
    }

    fn headers(cache_control: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("cache-control", HeaderValue::from_str(cache_control).unwrap());
        h.insert("content-type", HeaderValue::from_static("text/plain"));
        h
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://example.com/{}", path)).unwrap()
    }

    fn store(cache: &mut HttpCache, path: &str, body: &[u8]) -> Result<(), CacheError> {
        let resource = cache.create_cached_resource(
            &Method::GET,
            &url(path),
            StatusCode::OK,
            Version::HTTP_11,
            &headers("max-age=3600"),
        )?;
        cache.add_cached_resource(resource, body)
    }

    #[test]
    fn test_store_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        store(&mut cache, "a", b"hello").unwrap();
        let (resource, body) = cache.read(&url("a#frag")).unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert_eq!(resource.file_name(), "00000000.cache");
        assert!(dir.path().join("00000000.cache").exists());
        assert_eq!(cache.total_content_size(), 5);
    }

    #[test]
    fn test_refusals() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        let r = cache.create_cached_resource(
            &Method::POST,
            &url("a"),
            StatusCode::OK,
            Version::HTTP_11,
            &headers("max-age=60"),
        );
        assert!(matches!(r, Err(CacheError::NotCacheable("method"))));

        let r = cache.create_cached_resource(
            &Method::GET,
            &url("a"),
            StatusCode::OK,
            Version::HTTP_11,
            &headers("no-store"),
        );
        assert!(matches!(r, Err(CacheError::NotCacheable("no-store"))));

        let r = store(&mut cache, "big", &[0u8; 101]);
        assert!(matches!(r, Err(CacheError::EntryTooLarge { size: 101, .. })));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = HttpCache::disabled();
        assert!(matches!(store(&mut cache, "a", b"x"), Err(CacheError::Disabled)));
        assert!(cache.lookup(&url("a")).is_none());
    }

    #[test]
    fn test_entry_limit_evicts_oldest_unused() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        store(&mut cache, "1", b"one").unwrap();
        store(&mut cache, "2", b"two").unwrap();
        store(&mut cache, "3", b"three").unwrap();
        assert!(cache.lookup(&url("1")).is_some());

        store(&mut cache, "4", b"four").unwrap();
        assert_eq!(cache.entry_count(), 3);
        assert!(cache.peek(&url("1")).is_some());
        assert!(cache.peek(&url("2")).is_none());
    }

    #[test]
    fn test_second_chance_clears_used_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        for p in ["1", "2", "3"] {
            store(&mut cache, p, b"x").unwrap();
            assert!(cache.lookup(&url(p)).is_some());
        }

        store(&mut cache, "4", b"y").unwrap();
        assert_eq!(cache.entry_count(), 3);
        assert!(cache.peek(&url("1")).is_none());
        assert!(!cache.peek(&url("2")).unwrap().is_used());
    }

    #[test]
    fn test_total_size_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        store(&mut cache, "1", &[1u8; 100]).unwrap();
        store(&mut cache, "2", &[2u8; 100]).unwrap();
        store(&mut cache, "3", &[3u8; 100]).unwrap();
        assert!(cache.total_content_size() <= 250);
        assert_eq!(cache.entry_count(), 2);
        assert!(cache.peek(&url("1")).is_none());
    }

    #[test]
    fn test_replace_same_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();

        store(&mut cache, "a", b"old").unwrap();
        store(&mut cache, "a", b"newer").unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.total_content_size(), 5);
        assert!(!dir.path().join("00000000.cache").exists());
        assert_eq!(cache.read(&url("a")).unwrap().1, Bytes::from_static(b"newer"));
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = HttpCache::open(config(dir.path())).unwrap();
            store(&mut cache, "a", b"alpha").unwrap();
            store(&mut cache, "b", b"beta").unwrap();
            assert!(cache.is_dirty());
            cache.flush().unwrap();
            assert!(!cache.is_dirty());
        }

        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        assert_eq!(cache.entry_count(), 2);
        assert_eq!(cache.total_content_size(), 9);
        assert_eq!(cache.read(&url("b")).unwrap().1, Bytes::from_static(b"beta"));

        store(&mut cache, "c", b"gamma").unwrap();
        assert_eq!(cache.peek(&url("c")).unwrap().file_name(), "00000002.cache");
    }

    #[test]
    fn test_corrupt_index_wipes_directory() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = HttpCache::open(config(dir.path())).unwrap();
            store(&mut cache, "a", b"alpha").unwrap();
            cache.flush().unwrap();
        }
        let index = dir.path().join(INDEX_FILE_NAME);
        let mut data = fs::read(&index).unwrap();
        data[20] ^= 0x55;
        fs::write(&index, data).unwrap();

        let cache = HttpCache::open(config(dir.path())).unwrap();
        assert_eq!(cache.entry_count(), 0);
        assert!(!dir.path().join("00000000.cache").exists());
        assert!(!index.exists());
    }

    #[test]
    fn test_missing_body_file_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        store(&mut cache, "a", b"alpha").unwrap();
        fs::remove_file(dir.path().join("00000000.cache")).unwrap();

        assert!(matches!(cache.read(&url("a")), Err(CacheError::Io(_))));
        assert!(cache.peek(&url("a")).is_none());
        let err: NetError = CacheError::Missing("x".into()).into();
        assert_eq!(err, NetError::CacheMiss);
    }

    #[test]
    fn test_revalidation_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        let resource = cache
            .create_cached_resource(
                &Method::GET,
                &url("a"),
                StatusCode::OK,
                Version::HTTP_11,
                &headers("max-age=0"),
            )
            .unwrap();
        cache.add_cached_resource(resource, b"alpha").unwrap();
        assert!(cache.peek(&url("a")).unwrap().needs_revalidate());

        let updated = cache
            .update_cached_resource(&url("a"), &headers("max-age=600"))
            .unwrap();
        assert!(!updated.needs_revalidate());
        assert_eq!(cache.read(&url("a")).unwrap().1, Bytes::from_static(b"alpha"));
    }

    fn revalidate_with_etag(cache: &mut HttpCache, path: &str, etag: &str) -> Result<HttpCachedResource, CacheError> {
        let mut h = headers("max-age=600");
        h.insert("etag", HeaderValue::from_str(etag).unwrap());
        cache.update_cached_resource(&url(path), &h)
    }

    #[test]
    fn test_revalidation_growth_evicts_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        store(&mut cache, "a", b"alpha").unwrap();
        store(&mut cache, "b", b"beta").unwrap();
        cache.config.max_index_size = cache.total_index_size();

        let long_etag = format!("\"{}\"", "e".repeat(64));
        let updated = revalidate_with_etag(&mut cache, "b", &long_etag).unwrap();

        assert_eq!(updated.etag(), Some(long_etag.as_str()));
        assert!(cache.peek(&url("a")).is_none());
        assert!(cache.total_index_size() <= cache.config.max_index_size);
        assert_eq!(cache.read(&url("b")).unwrap().1, Bytes::from_static(b"beta"));
    }

    #[test]
    fn test_revalidation_growth_past_ceiling_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        store(&mut cache, "a", b"alpha").unwrap();
        let file_name = cache.peek(&url("a")).unwrap().file_name().to_string();
        cache.config.max_index_size = cache.total_index_size();

        let long_etag = format!("\"{}\"", "e".repeat(64));
        let err = revalidate_with_etag(&mut cache, "a", &long_etag).unwrap_err();

        assert!(matches!(err, CacheError::NoRoom));
        assert!(cache.peek(&url("a")).is_none());
        assert_eq!(cache.total_index_size(), INDEX_HEADER_LEN as u64);
        assert!(!dir.path().join(file_name).exists());
    }

    #[test]
    fn test_body_write_failure_maps_to_cache_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir(&cache_dir).unwrap();
        let mut cache = HttpCache::open(config(&cache_dir)).unwrap();
        std::fs::remove_dir(&cache_dir).unwrap();

        let err = store(&mut cache, "a", b"alpha").unwrap_err();
        assert!(matches!(err, CacheError::Write(_)));
        assert!(matches!(NetError::from(err), NetError::CacheWriteFailed { .. }));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::open(config(dir.path())).unwrap();
        store(&mut cache, "a", b"alpha").unwrap();
        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_content_size(), 0);
        assert_eq!(cache.total_index_size(), INDEX_HEADER_LEN as u64);
    }
}
