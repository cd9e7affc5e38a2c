//! Cookie jar shared by every transfer of a loader context.
//!
//! [`CookieMonster`](monster::CookieMonster) stores cookies keyed by domain,
//! [`CanonicalCookie`](canonical_cookie::CanonicalCookie) is one parsed cookie,
//! and [`persistence`] reads and writes the jar file named by the loader
//! configuration.

pub mod canonical_cookie;
pub mod monster;
pub mod persistence;
pub mod psl;
