//! Connection setup.
//!
//! Mirrors the split in Chromium's `net/socket/`:
//! - [`connectjob`]: DNS → TCP → proxy tunnel → TLS
//! - [`proxy`] and [`proxyfilter`]: proxy routes and their bypass lists
//! - [`authcache`]: credentials shared by every job of a context
//! - [`tls`]: BoringSSL connector parameters

pub mod authcache;
pub mod client;
pub mod connectjob;
pub mod proxy;
pub mod proxyfilter;
pub mod tls;
