//! Blocking loads on a private transport.

use crate::http::response::ResourceResponse;
use crate::loader::client::{ResourceError, ResourceHandleClient};
use crate::loader::manager::ResourceHandleManager;
use crate::loader::request::ResourceRequest;
use crate::transport::Transport;
use std::sync::{Arc, Mutex};

/// Everything a synchronous load produced.
#[derive(Debug, Clone, Default)]
pub struct SyncLoadResult {
    pub response: Option<ResourceResponse>,
    pub data: Vec<u8>,
    pub error: Option<ResourceError>,
    /// Upload progress as last reported, `(sent, total)`.
    pub upload: Option<(u64, u64)>,
    finished: bool,
}

impl SyncLoadResult {
    pub fn is_success(&self) -> bool {
        self.finished && self.error.is_none()
    }
}

struct Collector {
    slot: Arc<Mutex<SyncLoadResult>>,
}

impl Collector {
    fn with<R>(&self, f: impl FnOnce(&mut SyncLoadResult) -> R) -> R {
        match self.slot.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl ResourceHandleClient for Collector {
    fn did_receive_response(&mut self, response: &ResourceResponse) {
        self.with(|r| r.response = Some(response.clone()));
    }

    fn did_receive_data(&mut self, data: &[u8]) {
        self.with(|r| r.data.extend_from_slice(data));
    }

    fn did_send_data(&mut self, sent: u64, total: u64) {
        self.with(|r| r.upload = Some((sent, total)));
    }

    fn did_finish_loading(&mut self) {
        self.with(|r| r.finished = true);
    }

    fn did_fail(&mut self, error: &ResourceError) {
        self.with(|r| r.error = Some(error.clone()));
    }
}

impl<T: Transport> ResourceHandleManager<T> {
    /// Load `request` to completion on the calling thread.
    ///
    /// Runs on an isolated single-connection transport without the cache, so
    /// the asynchronous pool is untouched. An `Ask` from the admission
    /// policy counts as a refusal and auth challenges nobody can answer
    /// deliver the 401.
    pub fn dispatch_synchronously(&self, request: ResourceRequest) -> SyncLoadResult {
        let url = request.url.clone();
        let mut loader = match self.isolated() {
            Ok(loader) => loader,
            Err(e) => {
                return SyncLoadResult {
                    error: Some(ResourceError::new(e, url)),
                    ..SyncLoadResult::default()
                }
            }
        };

        let slot = Arc::new(Mutex::new(SyncLoadResult::default()));
        let id = loader.submit(
            request,
            Box::new(Collector {
                slot: Arc::clone(&slot),
            }),
        );
        tracing::debug!(job = %id, url = %url, "synchronous load");

        let interval = loader.config().pump_interval();
        while loader.pump() {
            std::thread::sleep(interval);
        }
        drop(loader);

        match slot.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}
