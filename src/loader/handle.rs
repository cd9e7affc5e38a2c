use crate::base::loadstate::LoadState;
use crate::http::authchallenge::AuthChallenge;
use crate::http::cachedresource::HttpCachedResource;
use crate::http::response::ResourceResponse;
use crate::loader::auth::AuthState;
use crate::loader::client::ResourceHandleClient;
use crate::loader::request::ResourceRequest;
use crate::transport::TransferId;
use http::HeaderMap;
use std::fmt;
use url::Url;

/// Identifies one submitted job for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "j{}", self.0)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    pub load_state: LoadState,
    pub url: Url,
    pub redirect_count: u32,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub upload_total: u64,
    pub response_fired: bool,
}

/// How response bytes of the current transfer are treated.
#[derive(Debug, Clone)]
pub(crate) enum ResponseMode {
    Deliver,
    /// A surfaced challenge; keep the 401/407 in case the client gives up.
    Hold(AuthChallenge),
    /// A 304 being answered from the cache.
    Discard,
}

/// The mutable record of one job.
pub(crate) struct ResourceHandle {
    pub(crate) id: JobId,
    pub(crate) request: ResourceRequest,
    pub(crate) client: Box<dyn ResourceHandleClient>,
    state: LoadState,
    pub(crate) transfer: Option<TransferId>,
    pub(crate) redirect_count: u32,
    pub(crate) auth: AuthState,
    pub(crate) verify_peer: bool,
    pub(crate) ssl_retry_used: bool,
    /// Set once, right before the first `did_receive_response`.
    pub(crate) response_fired: bool,
    pub(crate) cancelled: bool,
    pub(crate) mode: ResponseMode,
    pub(crate) held_response: Option<ResourceResponse>,
    pub(crate) held_body: Vec<u8>,
    /// Entry being filled from the network body.
    pub(crate) cache_entry: Option<HttpCachedResource>,
    pub(crate) cache_body: Vec<u8>,
    /// Validators of a stale entry, sent with the next attempt.
    pub(crate) conditional: HeaderMap,
    /// Headers of a 304, applied to the stored entry on completion.
    pub(crate) not_modified: Option<HeaderMap>,
    pub(crate) skip_cache: bool,
    pub(crate) admitted_url: Option<Url>,
    pub(crate) bytes_received: u64,
    pub(crate) bytes_sent: u64,
    pub(crate) upload_total: u64,
}

impl ResourceHandle {
    pub(crate) fn new(
        id: JobId,
        request: ResourceRequest,
        client: Box<dyn ResourceHandleClient>,
    ) -> Self {
        Self {
            id,
            request,
            client,
            state: LoadState::Scheduled,
            transfer: None,
            redirect_count: 0,
            auth: AuthState::default(),
            verify_peer: true,
            ssl_retry_used: false,
            response_fired: false,
            cancelled: false,
            mode: ResponseMode::Deliver,
            held_response: None,
            held_body: Vec::new(),
            cache_entry: None,
            cache_body: Vec::new(),
            conditional: HeaderMap::new(),
            not_modified: None,
            skip_cache: false,
            admitted_url: None,
            bytes_received: 0,
            bytes_sent: 0,
            upload_total: 0,
        }
    }

    pub(crate) fn state(&self) -> LoadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, next: LoadState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(job = %self.id, from = ?self.state, to = ?next, "job state");
        self.state = next;
    }

    pub(crate) fn url(&self) -> &Url {
        &self.request.url
    }

    /// Forget everything tied to the previous attempt.
    pub(crate) fn reset_attempt(&mut self) {
        self.transfer = None;
        self.mode = ResponseMode::Deliver;
        self.held_response = None;
        self.held_body.clear();
        self.cache_entry = None;
        self.cache_body.clear();
        self.not_modified = None;
    }

    pub(crate) fn snapshot(&self) -> JobState {
        JobState {
            load_state: self.state,
            url: self.request.url.clone(),
            redirect_count: self.redirect_count,
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            upload_total: self.upload_total,
            response_fired: self.response_fired,
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("url", &self.request.url.as_str())
            .field("state", &self.state)
            .field("transfer", &self.transfer)
            .field("redirect_count", &self.redirect_count)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
