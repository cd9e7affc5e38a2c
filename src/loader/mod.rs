//! The resource loader.
//!
//! Requests enter through [`ResourceHandleManager::submit`] together with a
//! [`ResourceHandleClient`] that receives the response. The manager consults
//! the [`HttpCache`](crate::http::httpcache::HttpCache), asks the embedder's
//! [`AdmissionPolicy`] when a site filter is on, and runs admitted jobs on a
//! bounded set of transfers. Redirects, auth challenges, 304 revalidation
//! and the SSL retry all loop a job back through scheduling.
//!
//! [`LoaderContext`] wires the pieces together for production use.
//!
//! ```rust,ignore
//! use netloader::loader::{LoaderConfig, LoaderContext, ResourceRequest};
//!
//! let mut ctx = LoaderContext::start(LoaderConfig::default())?;
//! let url = url::Url::parse("https://example.com/")?;
//! ctx.manager_mut().submit(ResourceRequest::get(url), Box::new(MyClient::default()));
//! ctx.run_until_idle().await;
//! ctx.shutdown();
//! ```

mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod handle;
pub mod manager;
pub mod request;
pub mod sync;

pub use auth::MAX_AUTH_ATTEMPTS;
pub use client::{AdmissionPolicy, Permission, ResourceError, ResourceHandleClient};
pub use config::{ConfigError, LoaderConfig, ProxyConfig, RedirectMode};
pub use context::LoaderContext;
pub use handle::{JobId, JobState};
pub use manager::ResourceHandleManager;
pub use request::{CachePolicy, Composition, OwnerId, Priority, ResourceRequest};
pub use sync::SyncLoadResult;
