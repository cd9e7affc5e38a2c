//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`LoadState`](loadstate::LoadState): per-job lifecycle states reported to embedders

pub mod context;
pub mod loadstate;
pub mod neterror;

#[cfg(test)]
mod tests;
