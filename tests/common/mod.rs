//! Shared fixtures: a scripted in-memory transport and a recording client.

#![allow(dead_code)]

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use netloader::base::neterror::NetError;
use netloader::http::httpcache::{CacheConfig, HttpCache};
use netloader::http::response::ResourceResponse;
use netloader::loader::{LoaderConfig, ResourceError, ResourceHandleClient, ResourceHandleManager};
use netloader::http::authchallenge::AuthChallenge;
use netloader::tls::TrustStore;
use netloader::transport::share::ShareLocks;
use netloader::transport::{TransferEvent, TransferId, TransferOptions, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// One canned reply.
#[derive(Debug, Clone)]
pub struct Reply {
    status: Option<StatusCode>,
    headers: Vec<(String, String)>,
    body: Vec<Bytes>,
    error: Option<NetError>,
    stall: bool,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self::status(200).body(body)
    }

    pub fn status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).ok(),
            headers: Vec::new(),
            body: Vec::new(),
            error: None,
            stall: false,
        }
    }

    /// Fails before any header arrives.
    pub fn error(error: NetError) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body: Vec::new(),
            error: Some(error),
            stall: false,
        }
    }

    /// Completes without a response head.
    pub fn silent() -> Self {
        Self {
            status: None,
            ..Self::status(200)
        }
    }

    /// Never produces an event.
    pub fn stall() -> Self {
        Self {
            stall: true,
            ..Self::status(200)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, chunk: &str) -> Self {
        self.body.push(Bytes::copy_from_slice(chunk.as_bytes()));
        self
    }

    /// Fails after headers and body.
    pub fn then_fail(mut self, error: NetError) -> Self {
        self.error = Some(error);
        self
    }
}

/// What the manager asked for.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub id: TransferId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub proxy: Option<String>,
    pub proxy_user: Option<String>,
    pub verify_peer: bool,
    pub follow_redirects: bool,
    pub body: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    replies: HashMap<String, VecDeque<Reply>>,
    added: Vec<Recorded>,
    removed: Vec<TransferId>,
    live: Vec<(TransferId, Url, Reply, Option<u64>)>,
    events: VecDeque<TransferEvent>,
}

/// A [`Transport`] answering from a per-URL script.
///
/// Replies for a URL are used in order; the last one repeats. Unscripted
/// URLs get a 404.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
    share: Arc<ShareLocks>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            share: Arc::new(ShareLocks::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn script(&self, url: &str, reply: Reply) {
        let key = Url::parse(url).unwrap().to_string();
        self.lock().replies.entry(key).or_default().push_back(reply);
    }

    pub fn added(&self) -> Vec<Recorded> {
        self.lock().added.clone()
    }

    pub fn added_count(&self) -> usize {
        self.lock().added.len()
    }

    pub fn removed(&self) -> Vec<TransferId> {
        self.lock().removed.clone()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }
}

impl Transport for ScriptedTransport {
    fn add_transfer(&mut self, mut options: TransferOptions) -> TransferId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = TransferId(inner.next_id);

        let key = options.url.to_string();
        let reply = match inner.replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
        .unwrap_or_else(|| Reply::status(404));

        let body = options.body.as_mut().map(|b| b.read_to_end().to_vec());
        let upload = body.as_ref().map(|b| b.len() as u64);
        inner.added.push(Recorded {
            id,
            url: options.url.clone(),
            method: options.method.clone(),
            headers: options.headers.clone(),
            proxy: options.proxy.as_ref().map(|p| p.authority()),
            proxy_user: options
                .proxy
                .as_ref()
                .and_then(|p| p.credential.as_ref())
                .map(|c| c.username.clone()),
            verify_peer: options.verify_peer,
            follow_redirects: options.follow_redirects,
            body,
        });
        inner.live.push((id, options.url.clone(), reply, upload));
        id
    }

    fn remove_transfer(&mut self, id: TransferId) {
        let mut inner = self.lock();
        inner.removed.push(id);
        inner.live.retain(|(live, ..)| *live != id);
    }

    fn perform(&mut self) -> usize {
        let mut inner = self.lock();
        let live = std::mem::take(&mut inner.live);
        for (id, url, reply, upload) in live {
            if reply.stall {
                inner.live.push((id, url, reply, upload));
                continue;
            }
            if let Some(total) = upload {
                inner.events.push_back(TransferEvent::UploadProgress {
                    id,
                    sent: total,
                    total,
                });
            }
            if let Some(status) = reply.status {
                let mut headers = HeaderMap::new();
                for (name, value) in &reply.headers {
                    headers.append(
                        HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        HeaderValue::from_str(value).unwrap(),
                    );
                }
                self.share.store_cookies(&url, &headers);
                inner.events.push_back(TransferEvent::Headers {
                    id,
                    url: url.clone(),
                    status,
                    version: Version::HTTP_11,
                    headers,
                });
                for chunk in &reply.body {
                    inner.events.push_back(TransferEvent::Data {
                        id,
                        data: chunk.clone(),
                    });
                }
            }
            let result = match reply.error {
                Some(e) => Err(e),
                None => Ok(()),
            };
            inner.events.push_back(TransferEvent::Done { id, result });
        }
        inner.live.len()
    }

    fn read_events(&mut self) -> Vec<TransferEvent> {
        self.lock().events.drain(..).collect()
    }

    fn share_locks(&self) -> Arc<ShareLocks> {
        Arc::clone(&self.share)
    }

    fn isolated(&self) -> Result<Self, NetError> {
        Ok(self.clone())
    }
}

/// Callbacks as the client saw them.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Response { status: u16, from_cache: bool },
    Data(Vec<u8>),
    Redirect(String),
    Upload(u64, u64),
    Challenge(String),
    Finished,
    Failed(NetError),
}

#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Vec<Seen>>>,
    refuse_data: bool,
    retry_without_verification: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_data(mut self) -> Self {
        self.refuse_data = true;
        self
    }

    pub fn retrying_ssl(mut self) -> Self {
        self.retry_without_verification = true;
        self
    }

    pub fn client(&self) -> Box<dyn ResourceHandleClient> {
        Box::new(self.clone())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    pub fn body(&self) -> Vec<u8> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Data(d) => Some(d),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Count of `did_finish_loading` plus `did_fail`.
    pub fn outcomes(&self) -> usize {
        self.seen()
            .iter()
            .filter(|s| matches!(s, Seen::Finished | Seen::Failed(_)))
            .count()
    }

    pub fn error(&self) -> Option<NetError> {
        self.seen().into_iter().find_map(|s| match s {
            Seen::Failed(e) => Some(e),
            _ => None,
        })
    }

    fn push(&self, seen: Seen) {
        self.log.lock().unwrap().push(seen);
    }
}

impl ResourceHandleClient for Recorder {
    fn will_send_request(&mut self, new_url: &Url, _redirect_response: &ResourceResponse) {
        self.push(Seen::Redirect(new_url.to_string()));
    }

    fn did_receive_response(&mut self, response: &ResourceResponse) {
        self.push(Seen::Response {
            status: response.status().as_u16(),
            from_cache: response.from_cache(),
        });
    }

    fn will_receive_data(&mut self, _size: usize) -> bool {
        !self.refuse_data
    }

    fn did_receive_data(&mut self, data: &[u8]) {
        self.push(Seen::Data(data.to_vec()));
    }

    fn did_send_data(&mut self, sent: u64, total: u64) {
        self.push(Seen::Upload(sent, total));
    }

    fn did_finish_loading(&mut self) {
        self.push(Seen::Finished);
    }

    fn did_fail(&mut self, error: &ResourceError) {
        self.push(Seen::Failed(error.error.clone()));
    }

    fn did_receive_authentication_challenge(&mut self, challenge: &AuthChallenge) {
        self.push(Seen::Challenge(challenge.realm.clone()));
    }

    fn should_retry_without_ssl_verification(&mut self, _error: &ResourceError) -> bool {
        self.retry_without_verification
    }
}

pub fn manager(config: LoaderConfig) -> (ResourceHandleManager<ScriptedTransport>, ScriptedTransport) {
    manager_with_cache(config, HttpCache::disabled())
}

/// `RUST_LOG=netloader=trace cargo test` shows the scheduler at work.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manager_with_cache(
    config: LoaderConfig,
    cache: HttpCache,
) -> (ResourceHandleManager<ScriptedTransport>, ScriptedTransport) {
    init_tracing();
    let transport = ScriptedTransport::new();
    let manager = ResourceHandleManager::new(config, transport.clone(), cache, TrustStore::new());
    (manager, transport)
}

pub fn enabled_cache(dir: &std::path::Path) -> HttpCache {
    HttpCache::open(CacheConfig {
        enabled: true,
        directory: dir.to_path_buf(),
        ..CacheConfig::default()
    })
    .unwrap()
}

/// Pump until idle, bounded so a scheduling bug fails instead of hanging.
pub fn drive(manager: &mut ResourceHandleManager<ScriptedTransport>) {
    for _ in 0..100 {
        if !manager.pump() {
            return;
        }
    }
    panic!("manager never went idle");
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
