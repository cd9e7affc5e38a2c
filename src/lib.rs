//! # netloader
//!
//! The resource-loading engine of a browser port: it turns page and
//! subresource fetches into scheduled HTTP(S) transfers over a small,
//! bounded connection pool.
//!
//! ## Features
//!
//! - **Scheduling**: FIFO admission, connection ceilings with reserved
//!   diagnostic slots, a non-blocking pump driven by a timer
//! - **Disk cache**: freshness, conditional revalidation, two-chance eviction,
//!   a checksummed `index.fat`
//! - **Protocol handling**: redirects, Basic and Digest auth, cookies,
//!   content decoding, `file:` and `data:` URLs
//! - **Proxies**: HTTP and SOCKS5 with bypass lists
//! - **TLS**: BoringSSL with registrable roots, CRLs, client certificates and
//!   host overrides
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netloader::loader::{LoaderConfig, LoaderContext, ResourceRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut ctx = LoaderContext::start(LoaderConfig::from_file("loader.json")?)?;
//!     let url = url::Url::parse("https://example.com/")?;
//!     ctx.manager_mut()
//!         .submit(ResourceRequest::get(url), Box::new(PrintingClient));
//!     ctx.run_until_idle().await;
//!     ctx.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and job states
//! - [`cookies`] - Cookie jar with PSL validation and persistence
//! - [`http`] - Cache, upload bodies, auth challenges, responses
//! - [`loader`] - The resource handle manager and its client contract
//! - [`socket`] - Connect jobs, proxies, credential cache
//! - [`tls`] - Trust store and CRLs
//! - [`transport`] - Transfer engine under the manager

pub mod base;
pub mod cookies;
pub mod http;
pub mod loader;
pub mod socket;
pub mod tls;
pub mod transport;
