//! HTTP-level pieces used by the loader.
//!
//! - [`httpcache`] and [`cachedresource`]: the disk cache and its entries,
//!   with [`cacheindex`] as the `index.fat` codec
//! - [`formdata`]: upload bodies
//! - [`authchallenge`] and [`digestauth`]: parsing and answering challenges
//! - [`response`]: the response head handed to clients

pub mod authchallenge;
pub mod cachedresource;
pub mod cacheindex;
pub mod digestauth;
pub mod formdata;
pub mod httpcache;
pub mod response;

pub use formdata::{FormData, FormDataStream};
pub use httpcache::{CacheConfig, CacheError, HttpCache};
pub use response::ResourceResponse;
