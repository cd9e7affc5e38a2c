//! The scheduler at the heart of the loader.
//!
//! Jobs go through the cache and the admission gate, wait in a FIFO until a
//! connection slot frees up, run as transfers on the [`Transport`] and are
//! retired when the last event arrives. Everything happens inside
//! [`ResourceHandleManager::pump`], which never blocks; the embedder calls it
//! from a timer (see [`ResourceHandleManager::run_until_idle`]).

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::cookies::monster::CookieMonster;
use crate::http::authchallenge::{AuthChallenge, AuthScheme, Credential};
use crate::http::cachedresource::HttpCachedResource;
use crate::http::httpcache::{CacheError, HttpCache};
use crate::http::response::ResourceResponse;
use crate::loader::auth::AuthDecision;
use crate::loader::client::{AdmissionPolicy, Permission, ResourceError, ResourceHandleClient};
use crate::loader::config::{LoaderConfig, ProxyConfig, RedirectMode};
use crate::loader::handle::{JobId, JobState, ResourceHandle, ResponseMode};
use crate::loader::request::{CachePolicy, OwnerId, Priority, ResourceRequest};
use crate::socket::authcache::AuthCache;
use crate::socket::proxy::ProxySettings;
use crate::socket::proxyfilter::{ProxyFilter, SharedProxyFilter};
use crate::tls::truststore::{Fingerprint, TrustStore};
use crate::transport::hyper::switches_to_get;
use crate::transport::local::is_local_scheme;
use crate::transport::share::ShareLocks;
use crate::transport::{TransferEvent, TransferId, TransferOptions, Transport};
use bytes::Bytes;
use http::header::{
    HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, USER_AGENT,
};
use http::{HeaderMap, Method, StatusCode, Version};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use url::Url;

enum CacheVerdict {
    Serve,
    Network,
    Miss,
}

/// Owns every job, the transport and the cache.
pub struct ResourceHandleManager<T: Transport> {
    config: LoaderConfig,
    transport: T,
    share: Arc<ShareLocks>,
    cache: HttpCache,
    trust: TrustStore,
    auth_cache: AuthCache,
    proxy: Option<ProxySettings>,
    proxy_filter: SharedProxyFilter,
    admission: Option<Arc<dyn AdmissionPolicy>>,
    jobs: HashMap<JobId, ResourceHandle>,
    /// Jobs waiting to run, admitted or still asking.
    queue: VecDeque<JobId>,
    cache_reads: VecDeque<JobId>,
    running: HashMap<TransferId, JobId>,
    next_job: u64,
    clear_cookies_pending: bool,
    synchronous: bool,
}

impl<T: Transport> std::fmt::Debug for ResourceHandleManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandleManager")
            .field("jobs", &self.jobs.len())
            .field("queued", &self.queue.len())
            .field("running", &self.running.len())
            .field("synchronous", &self.synchronous)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ResourceHandleManager<T> {
    /// `trust` must be the store the transport checks handshakes against.
    pub fn new(config: LoaderConfig, transport: T, cache: HttpCache, trust: TrustStore) -> Self {
        let proxy = config.proxy.as_ref().map(ProxyConfig::to_settings);
        let filter = proxy
            .as_ref()
            .map(|p| p.bypass().clone())
            .unwrap_or_default();
        Self {
            share: transport.share_locks(),
            config,
            transport,
            cache,
            trust,
            auth_cache: AuthCache::new(),
            proxy,
            proxy_filter: SharedProxyFilter::new(filter),
            admission: None,
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            cache_reads: VecDeque::new(),
            running: HashMap::new(),
            next_job: 1,
            clear_cookies_pending: false,
            synchronous: false,
        }
    }

    /// A single-connection, cache-less sibling for synchronous loads.
    pub(super) fn isolated(&self) -> Result<Self, NetError> {
        let mut config = self.config.clone();
        config.max_http_connections = 1;
        config.max_websocket_connections = 1;
        config.reserved_connections = 0;
        Ok(Self {
            share: Arc::clone(&self.share),
            transport: self.transport.isolated()?,
            cache: HttpCache::disabled(),
            trust: self.trust.clone(),
            auth_cache: self.auth_cache.clone(),
            proxy: self.proxy.clone(),
            proxy_filter: self.proxy_filter.clone(),
            admission: self.admission.clone(),
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            cache_reads: VecDeque::new(),
            running: HashMap::new(),
            next_job: 1,
            clear_cookies_pending: false,
            synchronous: true,
            config,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &HttpCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut HttpCache {
        &mut self.cache
    }

    pub fn share_locks(&self) -> Arc<ShareLocks> {
        Arc::clone(&self.share)
    }

    pub fn cookies(&self) -> CookieMonster {
        self.share.cookies()
    }

    pub fn auth_cache(&self) -> &AuthCache {
        &self.auth_cache
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    pub fn set_admission_policy(&mut self, policy: Option<Arc<dyn AdmissionPolicy>>) {
        self.admission = policy;
    }

    pub fn with_admission_policy(mut self, policy: Arc<dyn AdmissionPolicy>) -> Self {
        self.admission = Some(policy);
        self
    }

    // ---- submission and admission ----

    /// Queue a request. Callbacks start on a later pump, except for immediate
    /// refusals (admission denied, cache-only miss).
    pub fn submit(
        &mut self,
        mut request: ResourceRequest,
        client: Box<dyn ResourceHandleClient>,
    ) -> JobId {
        request.url.set_fragment(None);
        let id = JobId(self.next_job);
        self.next_job += 1;
        tracing::debug!(job = %id, url = %request.url, method = %request.method, "job submitted");
        self.jobs.insert(id, ResourceHandle::new(id, request, client));
        self.schedule(id);
        id
    }

    /// Cache consult, then admission.
    fn schedule(&mut self, id: JobId) {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        match consult_cache(&mut self.cache, handle) {
            CacheVerdict::Serve => {
                tracing::debug!(job = %id, url = %handle.request.url, "serving from cache");
                handle.set_state(LoadState::ReadingCache);
                self.cache_reads.push_back(id);
            }
            CacheVerdict::Miss => self.fail(id, NetError::CacheMiss),
            CacheVerdict::Network => self.admission_check(id),
        }
    }

    fn admission_check(&mut self, id: JobId) {
        let same_host_running = self.config.single_connect_per_proxy_host && self.host_running(id);
        let synchronous = self.synchronous;
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        let url = handle.request.url.clone();

        let policy = match &self.admission {
            Some(policy)
                if self.config.site_filter
                    && !is_local_scheme(&url)
                    && !same_host_running
                    && handle.admitted_url.as_ref() != Some(&url) =>
            {
                Arc::clone(policy)
            }
            _ => {
                handle.set_state(LoadState::Admitted);
                self.queue.push_back(id);
                return;
            }
        };

        handle.set_state(LoadState::Suspended);
        handle.set_state(LoadState::Asking);
        let permission =
            match policy.will_permit_send_request(&url, handle.request.composition, synchronous) {
                Permission::Ask if synchronous => Permission::Deny,
                other => other,
            };
        match permission {
            Permission::Permit => {
                handle.admitted_url = Some(url);
                handle.set_state(LoadState::Admitted);
                self.queue.push_back(id);
            }
            Permission::Ask => {
                tracing::debug!(job = %id, url = %url, "admission deferred to embedder");
                self.queue.push_back(id);
            }
            Permission::Deny => {
                tracing::info!(job = %id, url = %url, "admission denied");
                self.fail(id, NetError::admission_denied(format!("site filter refused {url}")));
            }
        }
    }

    /// Answer a job left in `Asking`. Returns false if it was not asking.
    pub fn set_admission(&mut self, id: JobId, permit: bool) -> bool {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return false;
        };
        if handle.state() != LoadState::Asking || handle.cancelled {
            return false;
        }
        if permit {
            handle.admitted_url = Some(handle.request.url.clone());
            handle.set_state(LoadState::Admitted);
        } else {
            let url = handle.request.url.clone();
            self.fail(id, NetError::admission_denied(format!("embedder refused {url}")));
        }
        true
    }

    fn host_running(&self, id: JobId) -> bool {
        let Some(target) = self.jobs.get(&id).and_then(|h| h.request.host_port()) else {
            return false;
        };
        self.running
            .values()
            .filter(|job| **job != id)
            .filter_map(|job| self.jobs.get(job))
            .any(|h| !h.cancelled && h.request.host_port().as_ref() == Some(&target))
    }

    // ---- the pump ----

    /// Run one scheduling cycle. Returns true while work remains.
    pub fn pump(&mut self) -> bool {
        self.promote();
        self.serve_cache_reads();
        self.transport.perform();
        for event in self.transport.read_events() {
            self.dispatch(event);
        }
        self.reap_cancelled();
        if self.running.is_empty() {
            self.on_idle();
        }
        self.has_work()
    }

    /// Pump on a short timer until nothing is left to drive.
    pub async fn run_until_idle(&mut self) {
        let interval = self.config.pump_interval();
        while self.pump() {
            tokio::time::sleep(interval).await;
        }
    }

    /// True while a pump could still make progress.
    pub fn has_work(&self) -> bool {
        !self.running.is_empty()
            || !self.cache_reads.is_empty()
            || self
                .queue
                .iter()
                .filter_map(|id| self.jobs.get(id))
                .any(|h| h.state() == LoadState::Admitted)
    }

    fn promote(&mut self) {
        let single_host = self.config.single_connect_per_proxy_host;
        let mut waiting = VecDeque::with_capacity(self.queue.len());
        while let Some(id) = self.queue.pop_front() {
            let Some(handle) = self.jobs.get(&id) else {
                continue;
            };
            if handle.state() != LoadState::Admitted
                || !self.has_slot(handle)
                || (single_host && self.host_running(id))
            {
                waiting.push_back(id);
                continue;
            }
            self.start_transfer(id);
        }
        self.queue = waiting;
    }

    fn has_slot(&self, handle: &ResourceHandle) -> bool {
        let websocket = handle.request.is_websocket();
        let (limit, reserve) = if websocket {
            (self.config.max_websocket_connections, 0)
        } else {
            (self.config.max_http_connections, self.config.reserved_connections)
        };
        if limit == 0 {
            return true;
        }
        let ceiling = if handle.request.priority == Priority::Diagnostic {
            limit + reserve
        } else {
            limit
        };
        let in_use = self
            .running
            .values()
            .filter_map(|job| self.jobs.get(job))
            .filter(|h| h.request.is_websocket() == websocket)
            .count();
        in_use < ceiling
    }

    fn route_for(&self, url: &Url) -> Option<ProxySettings> {
        let proxy = self.proxy.as_ref()?;
        if is_local_scheme(url) {
            return None;
        }
        let filter = self.proxy_filter.load();
        if filter.should_bypass_url(url) {
            tracing::trace!(url = %url, "proxy bypassed");
            return None;
        }
        Some(proxy.clone().with_filter(ProxyFilter::clone(&filter)))
    }

    fn start_transfer(&mut self, id: JobId) {
        let Some(url) = self.jobs.get(&id).map(|h| h.request.url.clone()) else {
            return;
        };
        let route = self.route_for(&url);
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        match build_options(&self.config, handle, route) {
            Ok(options) => {
                let transfer = self.transport.add_transfer(options);
                handle.transfer = Some(transfer);
                handle.set_state(LoadState::Running);
                self.running.insert(transfer, id);
                tracing::debug!(job = %id, transfer = %transfer, url = %url, "job running");
            }
            Err(e) => self.fail(id, e),
        }
    }

    fn dispatch(&mut self, event: TransferEvent) {
        let transfer = event.id();
        let Some(&id) = self.running.get(&transfer) else {
            tracing::trace!(transfer = %transfer, "event for retired transfer");
            return;
        };
        if self.jobs.get(&id).map_or(true, |h| h.cancelled) {
            return;
        }
        match event {
            TransferEvent::Headers {
                url,
                status,
                version,
                headers,
                ..
            } => self.on_headers(id, url, status, version, headers),
            TransferEvent::Data { data, .. } => self.on_data(id, &data),
            TransferEvent::UploadProgress { sent, total, .. } => self.on_upload(id, sent, total),
            TransferEvent::Done { result, .. } => self.on_completion(id, transfer, result),
        }
    }

    fn reap_cancelled(&mut self) {
        let cancelled: Vec<JobId> = self
            .jobs
            .values()
            .filter(|h| h.cancelled)
            .map(|h| h.id)
            .collect();
        for id in cancelled {
            if let Some(mut handle) = self.jobs.remove(&id) {
                if let Some(transfer) = handle.transfer.take() {
                    self.transport.remove_transfer(transfer);
                    self.running.remove(&transfer);
                    tracing::debug!(job = %id, transfer = %transfer, "cancelled transfer torn down");
                }
            }
        }
    }

    fn on_idle(&mut self) {
        if self.clear_cookies_pending {
            self.clear_cookies_pending = false;
            self.share.clear_cookies();
            tracing::info!("cookies cleared");
        }
        if self.queue.is_empty() && self.cache_reads.is_empty() && self.cache.is_dirty() {
            if let Err(e) = self.cache.flush() {
                tracing::warn!(error = %e, "cache index flush failed");
            }
        }
    }

    // ---- transfer events ----

    fn on_headers(
        &mut self,
        id: JobId,
        url: Url,
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
    ) {
        let route = self.route_for(&url);
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        if handle.request.url != url {
            tracing::debug!(job = %id, from = %handle.request.url, to = %url, "transport followed redirects");
            handle.request.url = url.clone();
        }

        if status == StatusCode::NOT_MODIFIED && !handle.conditional.is_empty() {
            handle.mode = ResponseMode::Discard;
            handle.not_modified = Some(headers);
            return;
        }

        let response = ResourceResponse::new(url.clone(), status, version, headers);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            let is_proxy = status == StatusCode::PROXY_AUTHENTICATION_REQUIRED;
            let server = if is_proxy {
                route.as_ref().map(|p| (p.host.clone(), p.port))
            } else {
                url.host_str()
                    .map(|h| (h.to_string(), url.port_or_known_default().unwrap_or(80)))
            };
            let challenge = server.and_then(|(host, port)| {
                AuthChallenge::from_headers(response.headers(), is_proxy, &host, port)
            });
            if let Some(challenge) = challenge {
                let decision = handle.auth.on_challenge(
                    challenge,
                    handle.request.credential.as_ref(),
                    &handle.request.url,
                    route.as_ref(),
                    &self.auth_cache,
                );
                match decision {
                    AuthDecision::Retry => {
                        tracing::debug!(job = %id, status = status.as_u16(), attempts = handle.auth.attempts(), "retrying with credentials");
                        self.restart(id);
                        return;
                    }
                    AuthDecision::Surface(challenge) => {
                        handle.mode = ResponseMode::Hold(challenge);
                        handle.held_response = Some(response);
                        return;
                    }
                    AuthDecision::Deliver => {}
                }
            }
        }

        if self.config.redirect_mode == RedirectMode::Internal
            && matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
        {
            match response.location() {
                Some(next) => {
                    if handle.request.method == Method::GET && !handle.skip_cache {
                        store_redirect(&mut self.cache, &url, status, version, response.headers(), &next);
                    }
                    self.follow_redirect(id, next, response);
                    return;
                }
                None if response.headers().contains_key(LOCATION) => {
                    tracing::debug!(job = %id, url = %url, "redirect Location does not resolve");
                    self.fail(id, NetError::InvalidRedirect);
                    return;
                }
                None => {}
            }
        }

        handle.auth.on_success(status.as_u16(), &self.auth_cache);
        if handle.response_fired {
            tracing::warn!(job = %id, "second response head ignored");
            return;
        }
        if !handle.skip_cache && self.cache.is_enabled() {
            match self.cache.create_cached_resource(
                &handle.request.method,
                &url,
                status,
                version,
                response.headers(),
            ) {
                Ok(entry) => handle.cache_entry = Some(entry),
                Err(e) => tracing::trace!(job = %id, reason = %e, "response not cached"),
            }
        }
        handle.response_fired = true;
        tracing::debug!(job = %id, status = status.as_u16(), url = %url, "response received");
        handle.client.did_receive_response(&response);
    }

    fn on_data(&mut self, id: JobId, data: &[u8]) {
        let max_entry = self.cache.config().max_entry_size;
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        match handle.mode {
            ResponseMode::Discard => return,
            ResponseMode::Hold(_) => {
                handle.held_body.extend_from_slice(data);
                return;
            }
            ResponseMode::Deliver => {}
        }
        if !handle.response_fired || data.is_empty() {
            return;
        }
        if !handle.client.will_receive_data(data.len()) {
            self.fail(id, NetError::DataRefused);
            return;
        }
        handle.bytes_received += data.len() as u64;
        handle.client.did_receive_data(data);

        if handle.cache_entry.is_some() {
            if (handle.cache_body.len() + data.len()) as u64 > max_entry {
                tracing::trace!(job = %id, "body outgrew the cache entry limit");
                handle.cache_entry = None;
                handle.cache_body = Vec::new();
            } else {
                handle.cache_body.extend_from_slice(data);
            }
        }
    }

    fn on_upload(&mut self, id: JobId, sent: u64, total: u64) {
        if let Some(handle) = self.jobs.get_mut(&id) {
            handle.bytes_sent = sent;
            handle.upload_total = total;
            handle.client.did_send_data(sent, total);
        }
    }

    fn on_completion(&mut self, id: JobId, transfer: TransferId, result: Result<(), NetError>) {
        self.running.remove(&transfer);
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        handle.transfer = None;
        let not_modified = handle.not_modified.take();
        let held = match &handle.mode {
            ResponseMode::Hold(challenge) => Some(challenge.clone()),
            _ => None,
        };
        let fired = handle.response_fired;

        if let Some(headers) = not_modified {
            self.refresh_from_cache(id, headers);
            return;
        }
        if let Some(challenge) = held {
            self.await_credentials(id, challenge);
            return;
        }
        match result {
            Ok(()) if fired => self.finish(id, true),
            Ok(()) => self.fail(id, NetError::EmptyResponse),
            Err(e) if e.is_timeout() && fired => {
                tracing::debug!(job = %id, "timed out after headers, completing with partial body");
                self.finish(id, false);
            }
            Err(e) => self.on_transfer_error(id, e),
        }
    }

    fn on_transfer_error(&mut self, id: JobId, error: NetError) {
        if error == NetError::ProxyAuthRequested && self.answer_tunnel_challenge(id) {
            return;
        }
        if error.is_ssl_failure() && self.offer_ssl_retry(id, &error) {
            return;
        }
        self.fail(id, error);
    }

    /// A CONNECT tunnel got 407: treat it as a Basic proxy challenge.
    fn answer_tunnel_challenge(&mut self, id: JobId) -> bool {
        let Some(url) = self.jobs.get(&id).map(|h| h.request.url.clone()) else {
            return false;
        };
        let Some(route) = self.route_for(&url) else {
            return false;
        };
        let challenge = AuthChallenge {
            scheme: AuthScheme::Basic,
            realm: String::new(),
            params: String::new(),
            is_proxy: true,
            host: route.host.to_ascii_lowercase(),
            port: route.port,
        };
        let Some(handle) = self.jobs.get_mut(&id) else {
            return false;
        };
        let decision =
            handle
                .auth
                .on_challenge(challenge, None, &url, Some(&route), &self.auth_cache);
        match decision {
            AuthDecision::Retry => {
                self.restart(id);
                true
            }
            AuthDecision::Surface(challenge) => {
                self.await_credentials(id, challenge);
                true
            }
            AuthDecision::Deliver => false,
        }
    }

    fn offer_ssl_retry(&mut self, id: JobId, error: &NetError) -> bool {
        let verify = self.config.verify_peer;
        let Some(handle) = self.jobs.get_mut(&id) else {
            return false;
        };
        if !verify || !handle.verify_peer || handle.ssl_retry_used || handle.response_fired {
            return false;
        }
        let report = ResourceError::new(error.clone(), handle.request.url.clone());
        if !handle.client.should_retry_without_ssl_verification(&report) {
            return false;
        }
        handle.ssl_retry_used = true;
        handle.verify_peer = false;
        tracing::warn!(job = %id, url = %handle.request.url, error = %error, "retrying without certificate verification");
        self.restart(id);
        true
    }

    // ---- redirects, auth, cache replies ----

    fn follow_redirect(&mut self, id: JobId, mut next: Url, response: ResourceResponse) {
        next.set_fragment(None);
        let max = self.config.max_redirects;
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        if let Some(transfer) = handle.transfer.take() {
            self.transport.remove_transfer(transfer);
            self.running.remove(&transfer);
        }

        let refusal = if !matches!(next.scheme(), "http" | "https") {
            Some(NetError::UnsafeRedirect)
        } else if handle.redirect_count >= max {
            Some(NetError::TooManyRedirects)
        } else {
            None
        };
        if let Some(error) = refusal {
            tracing::debug!(job = %id, to = %next, error = %error, "redirect refused");
            self.fail(id, error);
            return;
        }

        handle.redirect_count += 1;
        tracing::debug!(job = %id, from = %handle.request.url, to = %next, status = response.status().as_u16(), count = handle.redirect_count, "following redirect");
        handle.client.will_send_request(&next, &response);

        if switches_to_get(response.status(), &handle.request.method) {
            handle.request.method = Method::GET;
            handle.request.body = None;
            handle.request.headers.remove(CONTENT_TYPE);
            handle.request.headers.remove(CONTENT_LENGTH);
        }
        if next.origin() != handle.request.url.origin() {
            handle.request.headers.remove(AUTHORIZATION);
        }
        handle.auth.on_redirect(&next);
        handle.request.url = next;
        handle.conditional.clear();
        handle.skip_cache = false;
        handle.reset_attempt();
        handle.set_state(LoadState::Scheduled);
        self.schedule(id);
    }

    /// Drop the current transfer and go through scheduling again.
    fn restart(&mut self, id: JobId) {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        if let Some(transfer) = handle.transfer.take() {
            self.transport.remove_transfer(transfer);
            self.running.remove(&transfer);
        }
        handle.reset_attempt();
        handle.set_state(LoadState::Scheduled);
        self.schedule(id);
    }

    fn await_credentials(&mut self, id: JobId, challenge: AuthChallenge) {
        let synchronous = self.synchronous;
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        handle.set_state(LoadState::WaitingForCredentials);
        tracing::debug!(job = %id, realm = %challenge.realm, proxy = challenge.is_proxy, "waiting for credentials");
        if synchronous {
            self.continue_without_credential(id);
            return;
        }
        handle.client.did_receive_authentication_challenge(&challenge);
    }

    /// Retry a job waiting for credentials. Returns false if it was not waiting.
    pub fn use_credential(&mut self, id: JobId, credential: Credential) -> bool {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return false;
        };
        if handle.state() != LoadState::WaitingForCredentials {
            return false;
        }
        match handle.auth.use_credential(credential) {
            Ok(()) => self.restart(id),
            Err(e) => self.fail(id, e),
        }
        true
    }

    /// Give up on a challenge: the 401 is delivered as the response, a proxy
    /// challenge fails the job. Returns false if the job was not waiting.
    pub fn continue_without_credential(&mut self, id: JobId) -> bool {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return false;
        };
        if handle.state() != LoadState::WaitingForCredentials {
            return false;
        }
        handle.auth.clear_pending();
        let Some(response) = handle.held_response.take() else {
            self.fail(id, NetError::ProxyAuthRequested);
            return true;
        };
        let body = std::mem::take(&mut handle.held_body);
        handle.response_fired = true;
        handle.client.did_receive_response(&response);
        if !body.is_empty() {
            if !handle.client.will_receive_data(body.len()) {
                self.fail(id, NetError::DataRefused);
                return true;
            }
            handle.bytes_received += body.len() as u64;
            handle.client.did_receive_data(&body);
        }
        self.finish(id, false);
        true
    }

    fn serve_cache_reads(&mut self) {
        while let Some(id) = self.cache_reads.pop_front() {
            let Some(handle) = self.jobs.get(&id) else {
                continue;
            };
            let url = handle.request.url.clone();
            let policy = handle.request.cache_policy;
            match self.cache.read(&url) {
                Ok((entry, body)) => self.deliver_cached(id, entry, body),
                Err(e) => self.cache_read_failed(id, policy, e),
            }
        }
    }

    fn cache_read_failed(&mut self, id: JobId, policy: CachePolicy, error: CacheError) {
        if policy == CachePolicy::ReturnCacheDataDontLoad {
            self.fail(id, error.into());
            return;
        }
        tracing::warn!(job = %id, error = %error, "cache read failed, loading from network");
        if let Some(handle) = self.jobs.get_mut(&id) {
            handle.skip_cache = true;
            handle.conditional.clear();
        }
        self.restart(id);
    }

    /// 304: refresh the stored entry and answer from it.
    fn refresh_from_cache(&mut self, id: JobId, headers: HeaderMap) {
        let Some(url) = self.jobs.get(&id).map(|h| h.request.url.clone()) else {
            return;
        };
        let refreshed = self
            .cache
            .update_cached_resource(&url, &headers)
            .and_then(|_| self.cache.read(&url));
        match refreshed {
            Ok((entry, body)) => {
                tracing::debug!(job = %id, url = %url, "not modified, serving cached body");
                if let Some(handle) = self.jobs.get_mut(&id) {
                    handle.set_state(LoadState::ReadingCache);
                }
                self.deliver_cached(id, entry, body);
            }
            Err(e) => {
                let policy = self
                    .jobs
                    .get(&id)
                    .map(|h| h.request.cache_policy)
                    .unwrap_or_default();
                self.cache_read_failed(id, policy, e);
            }
        }
    }

    fn deliver_cached(&mut self, id: JobId, entry: HttpCachedResource, body: Bytes) {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        let url = handle.request.url.clone();
        let policy = handle.request.cache_policy;

        if matches!(entry.status(), 301 | 308) {
            let target = std::str::from_utf8(&body)
                .ok()
                .and_then(|s| Url::parse(s).ok());
            match target {
                Some(next) => {
                    let response = cached_redirect_response(&entry, url, &next);
                    self.follow_redirect(id, next, response);
                }
                None => {
                    self.cache.remove(&url);
                    self.cache_read_failed(
                        id,
                        policy,
                        CacheError::Corrupt("cached redirect without target".to_string()),
                    );
                }
            }
            return;
        }

        let response = entry.to_response(url);
        handle.response_fired = true;
        handle.client.did_receive_response(&response);
        if !body.is_empty() {
            if !handle.client.will_receive_data(body.len()) {
                self.fail(id, NetError::DataRefused);
                return;
            }
            handle.bytes_received += body.len() as u64;
            handle.client.did_receive_data(&body);
        }
        self.finish(id, false);
    }

    // ---- retirement ----

    fn retire(&mut self, id: JobId) -> Option<ResourceHandle> {
        let mut handle = self.jobs.remove(&id)?;
        if let Some(transfer) = handle.transfer.take() {
            self.transport.remove_transfer(transfer);
            self.running.remove(&transfer);
        }
        self.queue.retain(|job| *job != id);
        self.cache_reads.retain(|job| *job != id);
        Some(handle)
    }

    fn finish(&mut self, id: JobId, store: bool) {
        let Some(mut handle) = self.retire(id) else {
            return;
        };
        if let (true, Some(entry)) = (store, handle.cache_entry.take()) {
            let body = std::mem::take(&mut handle.cache_body);
            if let Err(e) = self.cache.add_cached_resource(entry, &body) {
                tracing::debug!(job = %id, reason = %e, "response not stored");
            }
        }
        handle.set_state(LoadState::Completed);
        tracing::debug!(job = %id, url = %handle.request.url, bytes = handle.bytes_received, "job finished");
        handle.client.did_finish_loading();
    }

    fn fail(&mut self, id: JobId, error: NetError) {
        let Some(mut handle) = self.retire(id) else {
            return;
        };
        handle.set_state(LoadState::Failed);
        let report = ResourceError::new(error, handle.request.url.clone());
        tracing::debug!(job = %id, url = %report.url, error = %report.error, "job failed");
        handle.client.did_fail(&report);
    }

    // ---- cancellation ----

    /// Cancel a job. The client hears nothing more. Safe to repeat.
    pub fn cancel(&mut self, id: JobId) {
        let Some(handle) = self.jobs.get_mut(&id) else {
            return;
        };
        if handle.cancelled {
            return;
        }
        handle.cancelled = true;
        handle.set_state(LoadState::Cancelled);
        tracing::debug!(job = %id, url = %handle.request.url, "job cancelled");
        if handle.transfer.is_none() {
            self.jobs.remove(&id);
            self.queue.retain(|job| *job != id);
            self.cache_reads.retain(|job| *job != id);
        }
    }

    /// Cancel every job of `owner`. Returns how many were live.
    pub fn cancel_by_owner(&mut self, owner: OwnerId) -> usize {
        let ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|h| !h.cancelled && h.request.owner == Some(owner))
            .map(|h| h.id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|h| !h.cancelled)
            .map(|h| h.id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    // ---- shared state ----

    /// Clear the cookie jar once no job is running.
    pub fn clear_cookies(&mut self) {
        if self.running.is_empty() {
            self.share.clear_cookies();
        } else {
            self.clear_cookies_pending = true;
        }
    }

    pub fn set_proxy(&mut self, proxy: Option<ProxyConfig>) {
        self.proxy = proxy.as_ref().map(ProxyConfig::to_settings);
        let filter = self
            .proxy
            .as_ref()
            .map(|p| p.bypass().clone())
            .unwrap_or_default();
        self.proxy_filter.replace(filter);
        self.config.proxy = proxy;
        tracing::info!(proxy = ?self.proxy.as_ref().map(ProxySettings::authority), "proxy reconfigured");
    }

    /// Replace the bypass list of the current proxy.
    pub fn set_proxy_bypass(&mut self, bypass: &str) {
        self.proxy_filter.replace(ProxyFilter::parse(bypass));
        if let Some(proxy) = self.config.proxy.as_mut() {
            proxy.bypass = bypass.to_string();
        }
    }

    pub fn proxy_filter(&self) -> Arc<ProxyFilter> {
        self.proxy_filter.load()
    }

    // ---- statistics ----

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Jobs not yet bound to a transfer.
    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.cache_reads.len()
    }

    /// Snapshot of a live job; retired jobs are gone.
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.jobs.get(&id).map(ResourceHandle::snapshot)
    }

    // ---- trust material ----

    pub fn register_root_ca(&self, pem_or_der: &[u8]) -> Result<Fingerprint, NetError> {
        let fp = self.trust.register_root_ca(pem_or_der)?;
        self.share.invalidate_tls();
        Ok(fp)
    }

    pub fn unregister_root_ca(&self, fp: &Fingerprint) -> bool {
        self.trust_changed(self.trust.unregister_root_ca(fp))
    }

    pub fn register_crl(&self, id: &str, data: &[u8]) -> Result<usize, NetError> {
        let revoked = self.trust.register_crl(id, data)?;
        self.share.invalidate_tls();
        Ok(revoked)
    }

    pub fn unregister_crl(&self, id: &str) -> bool {
        self.trust_changed(self.trust.unregister_crl(id))
    }

    pub fn set_client_certificate(&self, cert: &[u8], key: &[u8]) -> Result<(), NetError> {
        self.trust.set_client_certificate(cert, key)?;
        self.share.invalidate_tls();
        Ok(())
    }

    pub fn clear_client_certificate(&self) {
        self.trust.clear_client_certificate();
        self.share.invalidate_tls();
    }

    pub fn blacklist_certificate(&self, data: &[u8]) -> Result<Fingerprint, NetError> {
        let fp = self.trust.blacklist_certificate(data)?;
        self.share.invalidate_tls();
        Ok(fp)
    }

    pub fn unblacklist_certificate(&self, fp: &Fingerprint) -> bool {
        self.trust_changed(self.trust.unblacklist(fp))
    }

    pub fn register_ev_oid(&self, root: Fingerprint, oid: impl Into<String>) {
        self.trust.register_ev_oid(root, oid);
    }

    pub fn unregister_ev_oid(&self, root: &Fingerprint) -> bool {
        self.trust.unregister_ev_oid(root)
    }

    /// Accept certificate errors from `host`.
    pub fn allow_host(&self, host: &str) {
        self.trust.allow_host(host);
        self.share.invalidate_tls();
    }

    pub fn disallow_host(&self, host: &str) -> bool {
        self.trust_changed(self.trust.disallow_host(host))
    }

    fn trust_changed(&self, changed: bool) -> bool {
        if changed {
            self.share.invalidate_tls();
        }
        changed
    }
}

fn consult_cache(cache: &mut HttpCache, handle: &mut ResourceHandle) -> CacheVerdict {
    let policy = handle.request.cache_policy;
    let eligible = !handle.skip_cache
        && handle.request.method == Method::GET
        && policy != CachePolicy::ReloadIgnoringCache;
    let entry = if eligible {
        cache.lookup(&handle.request.url)
    } else {
        None
    };
    let Some(entry) = entry else {
        return if policy == CachePolicy::ReturnCacheDataDontLoad {
            CacheVerdict::Miss
        } else {
            CacheVerdict::Network
        };
    };
    match policy {
        CachePolicy::ReturnCacheDataElseLoad | CachePolicy::ReturnCacheDataDontLoad => {
            CacheVerdict::Serve
        }
        _ if !entry.needs_revalidate() => CacheVerdict::Serve,
        _ => {
            if entry.has_validator() {
                handle.conditional = entry.conditional_headers();
            }
            CacheVerdict::Network
        }
    }
}

fn build_options(
    config: &LoaderConfig,
    handle: &mut ResourceHandle,
    mut proxy: Option<ProxySettings>,
) -> Result<TransferOptions, NetError> {
    let mut options =
        TransferOptions::new(handle.request.method.clone(), handle.request.url.clone());
    let mut headers = handle.request.headers.clone();
    for (name, value) in handle.conditional.iter() {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(agent) = config.user_agent.as_deref() {
        if !headers.contains_key(USER_AGENT) {
            if let Ok(value) = HeaderValue::from_str(agent) {
                headers.insert(USER_AGENT, value);
            }
        }
    }
    if config.do_not_track {
        headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
    }
    handle.auth.apply(
        &handle.request.method,
        &handle.request.url,
        &mut headers,
        proxy.as_mut(),
    )?;
    options.headers = headers;

    if let Some(form) = &handle.request.body {
        let stream = form.stream();
        handle.upload_total = stream.total_size();
        options.body = Some(stream);
    }

    options.dns_timeout = config.dns_timeout();
    options.connect_timeout = config.connect_timeout();
    options.timeout = config.response_timeout();
    options.verify_peer = config.verify_peer && handle.verify_peer;
    options.serialize_connect = config.single_connect_per_proxy_host && proxy.is_some();
    options.proxy = proxy;
    options.follow_redirects = config.redirect_mode == RedirectMode::Native;
    options.max_redirects = config.max_redirects;
    options.accept_encoding = config.accept_encoding.clone();
    Ok(options)
}

/// Permanent redirects are stored with the target URL as their body.
fn store_redirect(
    cache: &mut HttpCache,
    url: &Url,
    status: StatusCode,
    version: Version,
    headers: &HeaderMap,
    target: &Url,
) {
    if !cache.is_enabled() || !matches!(status.as_u16(), 301 | 308) {
        return;
    }
    let stored = cache
        .create_cached_resource(&Method::GET, url, status, version, headers)
        .and_then(|entry| cache.add_cached_resource(entry, target.as_str().as_bytes()));
    if let Err(e) = stored {
        tracing::trace!(url = %url, reason = %e, "redirect not cached");
    }
}

fn cached_redirect_response(entry: &HttpCachedResource, url: Url, target: &Url) -> ResourceResponse {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(target.as_str()) {
        headers.insert(LOCATION, value);
    }
    let status = StatusCode::from_u16(entry.status()).unwrap_or(StatusCode::MOVED_PERMANENTLY);
    ResourceResponse::new(url, status, Version::HTTP_11, headers).mark_from_cache()
}
