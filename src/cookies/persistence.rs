//! JSON cookie jar file.
//!
//! Only persistent cookies are written; session cookies die with the context.

use crate::cookies::canonical_cookie::{CanonicalCookie, SameSite};
use crate::cookies::monster::CookieMonster;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use time::OffsetDateTime;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct PersistentCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    secure: bool,
    http_only: bool,
    host_only: bool,
    #[serde(default)]
    same_site: SameSite,
    creation_unix_secs: i64,
    expires_unix_secs: i64,
}

/// Write the persistent cookies of `monster` to `path`.
///
/// Goes through a temp file so a crash never leaves a half-written jar.
pub fn save_cookies(monster: &CookieMonster, path: &Path) -> io::Result<usize> {
    let now = OffsetDateTime::now_utc();
    let cookies: Vec<PersistentCookie> = monster
        .iter_all_cookies()
        .filter(|c| !c.is_expired(now))
        .filter_map(|c| {
            let expires = c.expiration_time?.unix_timestamp();
            Some(PersistentCookie {
                creation_unix_secs: c.creation_time.unix_timestamp(),
                expires_unix_secs: expires,
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                host_only: c.host_only,
                same_site: c.same_site,
            })
        })
        .collect();

    let json = serde_json::to_string_pretty(&cookies)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(cookies.len())
}

/// Load the jar at `path` into `monster`, skipping expired entries.
/// A missing file loads nothing.
pub fn load_cookies_into(monster: &CookieMonster, path: &Path) -> io::Result<usize> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let stored: Vec<PersistentCookie> =
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let now = OffsetDateTime::now_utc();
    let mut loaded = 0;
    for pc in stored {
        let Ok(expires) = OffsetDateTime::from_unix_timestamp(pc.expires_unix_secs) else {
            continue;
        };
        if expires <= now {
            continue;
        }
        let created = OffsetDateTime::from_unix_timestamp(pc.creation_unix_secs).unwrap_or(now);

        monster.set_canonical_cookie(CanonicalCookie {
            name: pc.name,
            value: pc.value,
            domain: pc.domain,
            path: pc.path,
            creation_time: created,
            expiration_time: Some(expires),
            last_access_time: now,
            secure: pc.secure,
            http_only: pc.http_only,
            host_only: pc.host_only,
            same_site: pc.same_site,
        });
        loaded += 1;
    }
    Ok(loaded)
}

/// Load the jar at `path` into a fresh monster.
pub fn load_cookies(path: &Path) -> io::Result<CookieMonster> {
    let monster = CookieMonster::new();
    load_cookies_into(&monster, path)?;
    Ok(monster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use url::Url;

    #[test]
    fn test_save_load_roundtrip() {
        let monster = CookieMonster::new();
        let u = Url::parse("https://example.com/").unwrap();
        monster.set_cookie_from_header(&u, "keep=1; Max-Age=3600; Secure; HttpOnly; SameSite=Strict");
        monster.set_cookie_from_header(&u, "session=2");

        let dir = tempdir().unwrap();
        let path = dir.path().join("jar").join("cookies.json");
        assert_eq!(save_cookies(&monster, &path).unwrap(), 1);

        let loaded = load_cookies(&path).unwrap();
        assert_eq!(loaded.total_cookie_count(), 1);
        let cookies = loaded.get_cookies_for_url(&u);
        assert_eq!(cookies[0].name, "keep");
        assert!(cookies[0].http_only);
        assert_eq!(cookies[0].same_site, SameSite::Strict);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let monster = CookieMonster::new();
        assert_eq!(load_cookies_into(&monster, &dir.path().join("none.json")).unwrap(), 0);
    }

    #[test]
    fn test_garbage_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_cookies(&path).is_err());
    }
}
