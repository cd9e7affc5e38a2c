//! Production [`Transport`] over hyper HTTP/1.1 client connections.
//!
//! Every transfer is a tokio task: connect job, one request per redirect hop,
//! then the body streamed back as events. The manager side only ever touches
//! the event channel, so `perform` and `read_events` never block.

use super::local;
use super::share::ShareLocks;
use super::{TransferEvent, TransferId, TransferOptions, Transport};
use crate::base::neterror::NetError;
use crate::http::formdata::FormDataStream;
use crate::socket::connectjob::ConnectJob;
use crate::socket::tls::TlsConfig;
use crate::tls::truststore::TrustStore;
use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder};
use bytes::Bytes;
use futures::TryStreamExt;
use http::header::{
    HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, HOST,
    LOCATION, PROXY_AUTHORIZATION,
};
use http::{HeaderMap, Method, Request, Response, StatusCode, Version};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use url::Url;

/// Read size for response bodies.
const READ_CHUNK: usize = 16 * 1024;

/// Upload chunk size.
const UPLOAD_CHUNK: usize = 16 * 1024;

/// Upload chunks read ahead of the connection.
const UPLOAD_QUEUE: usize = 4;

type RequestBody = BoxBody<Bytes, io::Error>;

enum RuntimeSlot {
    Shared(Handle),
    Owned(Option<Runtime>),
}

impl RuntimeSlot {
    fn handle(&self) -> Option<Handle> {
        match self {
            RuntimeSlot::Shared(handle) => Some(handle.clone()),
            RuntimeSlot::Owned(rt) => rt.as_ref().map(|rt| rt.handle().clone()),
        }
    }
}

fn owned_runtime(workers: usize) -> Result<Runtime, NetError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("netloader-transfer")
        .enable_all()
        .build()
        .map_err(|e| {
            tracing::warn!(error = %e, "could not start transfer runtime");
            NetError::Unknown(-1)
        })
}

/// State every transfer task needs.
#[derive(Debug, Clone)]
struct TransferContext {
    share: Arc<ShareLocks>,
    tls: Arc<TlsConfig>,
    trust: TrustStore,
}

pub struct HyperTransport {
    runtime: RuntimeSlot,
    ctx: TransferContext,
    next_id: u64,
    tasks: HashMap<TransferId, JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<TransferEvent>,
    events_rx: mpsc::UnboundedReceiver<TransferEvent>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("owned_runtime", &matches!(self.runtime, RuntimeSlot::Owned(_)))
            .field("live", &self.tasks.len())
            .finish()
    }
}

impl HyperTransport {
    /// Spawn transfers on the current tokio runtime, or on a private one
    /// when called outside a runtime.
    pub fn new(share: Arc<ShareLocks>, tls: TlsConfig, trust: TrustStore) -> Result<Self, NetError> {
        let runtime = match Handle::try_current() {
            Ok(handle) => RuntimeSlot::Shared(handle),
            Err(_) => RuntimeSlot::Owned(Some(owned_runtime(2)?)),
        };
        Ok(Self::with_runtime(
            runtime,
            TransferContext {
                share,
                tls: Arc::new(tls),
                trust,
            },
        ))
    }

    fn with_runtime(runtime: RuntimeSlot, ctx: TransferContext) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            ctx,
            next_id: 0,
            tasks: HashMap::new(),
            events_tx,
            events_rx,
        }
    }
}

impl Transport for HyperTransport {
    fn add_transfer(&mut self, options: TransferOptions) -> TransferId {
        self.next_id += 1;
        let id = TransferId(self.next_id);
        let tx = self.events_tx.clone();

        let Some(handle) = self.runtime.handle() else {
            let _ = tx.send(TransferEvent::Done {
                id,
                result: Err(NetError::Aborted),
            });
            return id;
        };

        tracing::debug!(transfer = %id, url = %options.url, method = %options.method, "transfer added");
        let ctx = self.ctx.clone();
        let task = handle.spawn(run_transfer(id, options, ctx, tx));
        self.tasks.insert(id, task);
        id
    }

    fn remove_transfer(&mut self, id: TransferId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
            tracing::debug!(transfer = %id, "transfer removed");
        }
    }

    fn perform(&mut self) -> usize {
        self.tasks.retain(|_, task| !task.is_finished());
        self.tasks.len()
    }

    fn read_events(&mut self) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn share_locks(&self) -> Arc<ShareLocks> {
        Arc::clone(&self.ctx.share)
    }

    fn isolated(&self) -> Result<Self, NetError> {
        let runtime = RuntimeSlot::Owned(Some(owned_runtime(1)?));
        Ok(Self::with_runtime(runtime, self.ctx.clone()))
    }
}

impl Drop for HyperTransport {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        if let RuntimeSlot::Owned(rt) = &mut self.runtime {
            if let Some(rt) = rt.take() {
                rt.shutdown_background();
            }
        }
    }
}

async fn run_transfer(
    id: TransferId,
    mut options: TransferOptions,
    ctx: TransferContext,
    tx: mpsc::UnboundedSender<TransferEvent>,
) {
    let limit = options.timeout;
    let work = execute(id, &mut options, &ctx, &tx);
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(NetError::TimedOut)),
        None => work.await,
    };
    if let Err(e) = &result {
        tracing::debug!(transfer = %id, url = %options.url, error = %e, "transfer failed");
    }
    let _ = tx.send(TransferEvent::Done { id, result });
}

async fn execute(
    id: TransferId,
    options: &mut TransferOptions,
    ctx: &TransferContext,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<(), NetError> {
    let mut url = options.url.clone();
    let mut method = options.method.clone();
    let mut body = options.body.take().map(|b| Arc::new(Mutex::new(b)));
    let mut redirects = 0u32;

    loop {
        if local::is_local_scheme(&url) {
            let response = local::load(&url).await?;
            let _ = tx.send(TransferEvent::Headers {
                id,
                url: url.clone(),
                status: response.status,
                version: Version::HTTP_11,
                headers: response.headers,
            });
            if !response.body.is_empty() {
                let _ = tx.send(TransferEvent::Data {
                    id,
                    data: response.body,
                });
            }
            return Ok(());
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetError::UnknownUrlScheme);
        }

        let job = ConnectJob::new(
            Arc::clone(&ctx.share),
            Arc::clone(&ctx.tls),
            ctx.trust.clone(),
        )
        .with_timeouts(options.dns_timeout, options.connect_timeout)
        .verify_peer(options.verify_peer)
        .serialized(options.serialize_connect);
        let connected = job.connect(&url, options.proxy.as_ref()).await?;
        let via_proxy = connected.via_http_proxy;
        if let Some(trust) = &connected.trust {
            tracing::trace!(
                peer = ?connected.socket.peer_addr(),
                override_applied = trust.override_applied,
                ev_policy = ?trust.ev_policy,
                "peer certificate accepted"
            );
        }

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, RequestBody>(TokioIo::new(connected.socket))
                .await
                .map_err(|e| map_hyper_error(&e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection closed with error");
            }
        });

        let request_body = match &body {
            Some(stream) => {
                lock_stream(stream).refresh();
                UploadBody::new(id, Arc::clone(stream), tx.clone()).boxed()
            }
            None => Empty::<Bytes>::new().map_err(|never| match never {}).boxed(),
        };
        let request = build_request(&url, &method, options, via_proxy, &ctx.share, request_body)?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| upload_failure(&body).unwrap_or_else(|| map_hyper_error(&e)))?;

        if options.use_cookies {
            ctx.share.store_cookies(&url, response.headers());
        }

        let status = response.status();
        if options.follow_redirects && status.is_redirection() {
            if let Some(next) = redirect_target(&url, response.headers()) {
                redirects += 1;
                if redirects > options.max_redirects {
                    return Err(NetError::TooManyRedirects);
                }
                if switches_to_get(status, &method) {
                    method = Method::GET;
                    body = None;
                    options.headers.remove(CONTENT_LENGTH);
                    options.headers.remove(http::header::CONTENT_TYPE);
                }
                if next.origin() != url.origin() {
                    options.headers.remove(AUTHORIZATION);
                }
                tracing::debug!(transfer = %id, from = %url, to = %next, status = status.as_u16(), "following redirect");
                url = next;
                continue;
            }
        }

        return deliver_response(id, url, response, options.accept_encoding.is_some(), tx).await;
    }
}

fn lock_stream(stream: &Mutex<FormDataStream>) -> std::sync::MutexGuard<'_, FormDataStream> {
    match stream.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 303 always, and 301/302 for POST, replay as GET without a body.
pub(crate) fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        _ => false,
    }
}

fn redirect_target(base: &Url, headers: &HeaderMap) -> Option<Url> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let mut next = base.join(location).ok()?;
    next.set_fragment(None);
    Some(next)
}

fn build_request(
    url: &Url,
    method: &Method,
    options: &TransferOptions,
    via_proxy: bool,
    share: &ShareLocks,
    body: RequestBody,
) -> Result<Request<RequestBody>, NetError> {
    let uri = if via_proxy {
        let mut absolute = url.clone();
        absolute.set_fragment(None);
        let _ = absolute.set_username("");
        let _ = absolute.set_password(None);
        absolute.to_string()
    } else {
        match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        }
    };

    let mut request = Request::builder()
        .method(method.clone())
        .uri(uri)
        .version(Version::HTTP_11)
        .body(body)
        .map_err(|_| NetError::InvalidUrl)?;

    let headers = request.headers_mut();
    for (name, value) in options.headers.iter() {
        headers.append(name.clone(), value.clone());
    }
    if !headers.contains_key(HOST) {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let value = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        headers.insert(
            HOST,
            HeaderValue::from_str(&value).map_err(|_| NetError::InvalidUrl)?,
        );
    }
    if options.use_cookies && !headers.contains_key(COOKIE) {
        if let Some(cookies) = share.cookie_header(url) {
            if let Ok(value) = HeaderValue::from_str(&cookies) {
                headers.insert(COOKIE, value);
            }
        }
    }
    if via_proxy && !headers.contains_key(PROXY_AUTHORIZATION) {
        if let Some(auth) = options.proxy.as_ref().and_then(|p| p.auth_header()) {
            if let Ok(value) = HeaderValue::from_str(&auth) {
                headers.insert(PROXY_AUTHORIZATION, value);
            }
        }
    }
    if let Some(encodings) = &options.accept_encoding {
        if !headers.contains_key(ACCEPT_ENCODING) {
            if let Ok(value) = HeaderValue::from_str(encodings) {
                headers.insert(ACCEPT_ENCODING, value);
            }
        }
    }
    Ok(request)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    Gzip,
    Deflate,
    Brotli,
}

fn content_coding(headers: &HeaderMap) -> Option<Coding> {
    let value = headers.get(CONTENT_ENCODING)?.to_str().ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => Some(Coding::Gzip),
        "deflate" => Some(Coding::Deflate),
        "br" => Some(Coding::Brotli),
        _ => None,
    }
}

async fn deliver_response(
    id: TransferId,
    url: Url,
    response: Response<Incoming>,
    decode: bool,
    tx: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<(), NetError> {
    let (parts, incoming) = response.into_parts();
    let mut headers = parts.headers;
    let coding = if decode { content_coding(&headers) } else { None };
    if coding.is_some() {
        headers.remove(CONTENT_ENCODING);
        headers.remove(CONTENT_LENGTH);
    }

    let _ = tx.send(TransferEvent::Headers {
        id,
        url,
        status: parts.status,
        version: parts.version,
        headers,
    });

    let frames = BodyStream::new(incoming)
        .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
        .map_err(io::Error::other);
    let raw = StreamReader::new(frames);
    let mut reader: Pin<Box<dyn AsyncRead + Send>> = match coding {
        Some(Coding::Gzip) => Box::pin(GzipDecoder::new(raw)),
        Some(Coding::Deflate) => Box::pin(ZlibDecoder::new(raw)),
        Some(Coding::Brotli) => Box::pin(BrotliDecoder::new(raw)),
        None => Box::pin(raw),
    };

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| {
            if coding.is_some() && e.kind() == io::ErrorKind::InvalidData {
                NetError::ContentDecodingFailed
            } else {
                map_body_error(&e)
            }
        })?;
        if n == 0 {
            return Ok(());
        }
        let _ = tx.send(TransferEvent::Data {
            id,
            data: Bytes::copy_from_slice(&buf[..n]),
        });
    }
}

fn map_hyper_error(err: &hyper::Error) -> NetError {
    if err.is_timeout() {
        NetError::TimedOut
    } else if err.is_parse() || err.is_parse_status() {
        NetError::InvalidResponse
    } else if err.is_incomplete_message() {
        NetError::EmptyResponse
    } else if err.is_canceled() || err.is_closed() {
        NetError::ConnectionClosed
    } else {
        NetError::ConnectionReset
    }
}

/// Body read failures. A peer that closes short of the declared length is a
/// length mismatch, not a reset.
fn map_body_error(err: &io::Error) -> NetError {
    match err.get_ref().and_then(|inner| inner.downcast_ref::<hyper::Error>()) {
        Some(hyper_err) if hyper_err.is_incomplete_message() || ended_early(hyper_err) => {
            NetError::ContentLengthMismatch
        }
        Some(hyper_err) => map_hyper_error(hyper_err),
        None => match err.kind() {
            io::ErrorKind::TimedOut => NetError::TimedOut,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::UnexpectedEof => NetError::ContentLengthMismatch,
            _ => NetError::ConnectionClosed,
        },
    }
}

fn ended_early(err: &hyper::Error) -> bool {
    std::error::Error::source(err)
        .and_then(|cause| cause.downcast_ref::<io::Error>())
        .is_some_and(|cause| cause.kind() == io::ErrorKind::UnexpectedEof)
}

/// Request body pulled from a [`FormDataStream`], reporting upload progress.
///
/// The stream is read on the blocking pool and its chunks arrive over a
/// bounded channel, so file reads never run on a runtime worker.
struct UploadBody {
    id: TransferId,
    chunks: mpsc::Receiver<Result<Bytes, NetError>>,
    total: u64,
    sent: u64,
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl UploadBody {
    fn new(
        id: TransferId,
        stream: Arc<Mutex<FormDataStream>>,
        tx: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        let (total, generation) = {
            let guard = lock_stream(&stream);
            (guard.total_size(), guard.generation())
        };
        let (chunk_tx, chunks) = mpsc::channel(UPLOAD_QUEUE);
        tokio::task::spawn_blocking(move || read_upload(&stream, generation, &chunk_tx));
        Self {
            id,
            chunks,
            total,
            sent: 0,
            tx,
        }
    }
}

/// Feed `chunk_tx` until the body ends, the request is dropped, or the
/// stream is rewound for another attempt.
fn read_upload(
    stream: &Mutex<FormDataStream>,
    generation: u64,
    chunk_tx: &mpsc::Sender<Result<Bytes, NetError>>,
) {
    loop {
        let mut chunk = vec![0u8; UPLOAD_CHUNK];
        let next = {
            let mut guard = lock_stream(stream);
            if guard.generation() != generation {
                return;
            }
            match guard.read(&mut chunk) {
                0 => match guard.failure() {
                    Some(e) => Some(Err(e.clone())),
                    None => None,
                },
                n => {
                    chunk.truncate(n);
                    Some(Ok(Bytes::from(chunk)))
                }
            }
        };
        let Some(next) = next else {
            return;
        };
        let last = next.is_err();
        if chunk_tx.blocking_send(next).is_err() || last {
            return;
        }
    }
}

/// The upload error, if the request body is what failed.
fn upload_failure(body: &Option<Arc<Mutex<FormDataStream>>>) -> Option<NetError> {
    body.as_ref()
        .and_then(|stream| lock_stream(stream).failure().cloned())
}

impl Body for UploadBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.chunks.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e)))),
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                let _ = this.tx.send(TransferEvent::UploadProgress {
                    id: this.id,
                    sent: this.sent,
                    total: this.total,
                });
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.sent >= self.total
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::formdata::FormData;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Serve one canned response per connection and hand back the requests.
    async fn serve(responses: Vec<Vec<u8>>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 64 * 1024];
                let mut request = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || complete(&request) {
                        break;
                    }
                }
                seen.push(String::from_utf8_lossy(&request).to_string());
                socket.write_all(&response).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (port, server)
    }

    fn complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..end]
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        request.len() >= end + 4 + length
    }

    fn transport() -> HyperTransport {
        HyperTransport::new(
            Arc::new(ShareLocks::default()),
            TlsConfig::default(),
            TrustStore::new(),
        )
        .unwrap()
    }

    async fn drain(t: &mut HyperTransport) -> Vec<TransferEvent> {
        let mut all = Vec::new();
        for _ in 0..500 {
            t.perform();
            let events = t.read_events();
            let done = events.iter().any(|e| matches!(e, TransferEvent::Done { .. }));
            all.extend(events);
            if done {
                return all;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transfer never finished");
    }

    fn body_of(events: &[TransferEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Data { data, .. } => Some(data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn test_get_with_cookies() {
        let (port, server) = serve(vec![
            b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=7\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec(),
        ])
        .await;
        let mut t = transport();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/a?b=1")).unwrap();

        t.add_transfer(TransferOptions::new(Method::GET, url.clone()));
        let events = drain(&mut t).await;
        assert!(matches!(events[0], TransferEvent::Headers { status, .. } if status == StatusCode::OK));
        assert_eq!(body_of(&events), b"hello");

        t.add_transfer(TransferOptions::new(Method::GET, url));
        drain(&mut t).await;

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /a?b=1 HTTP/1.1\r\n"));
        assert!(requests[1].to_ascii_lowercase().contains("cookie: sid=7"));
    }

    #[tokio::test]
    async fn test_native_redirect_post_becomes_get() {
        let (port, server) = serve(vec![
            b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n".to_vec(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(),
        ])
        .await;
        let mut t = transport();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/form")).unwrap();
        let mut options = TransferOptions::new(Method::POST, url);
        options.body = Some(FormData::from("a=1").stream());
        options.follow_redirects = true;
        options.max_redirects = 5;
        t.add_transfer(options);

        let events = drain(&mut t).await;
        match &events.iter().find(|e| matches!(e, TransferEvent::Headers { .. })) {
            Some(TransferEvent::Headers { url, .. }) => assert_eq!(url.path(), "/next"),
            _ => panic!("no headers"),
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, TransferEvent::UploadProgress { sent: 3, total: 3, .. })));

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /form"));
        assert!(requests[0].ends_with("a=1"));
        assert!(requests[1].starts_with("GET /next"));
    }

    #[tokio::test]
    async fn test_upload_skips_directory_element() {
        let dir = tempfile::tempdir().unwrap();
        let (port, server) =
            serve(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()]).await;
        let mut t = transport();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/upload")).unwrap();
        let mut options = TransferOptions::new(Method::POST, url);
        options.body = Some(
            FormData::new()
                .append_data("a=")
                .append_file(dir.path())
                .append_data("1")
                .stream(),
        );
        t.add_transfer(options);

        let events = drain(&mut t).await;
        assert!(matches!(events.last(), Some(TransferEvent::Done { result: Ok(()), .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, TransferEvent::UploadProgress { sent: 3, total: 3, .. })));

        let requests = server.await.unwrap();
        assert!(requests[0].to_ascii_lowercase().contains("content-length: 3\r\n"));
        assert!(requests[0].ends_with("a=1"));
    }

    #[test]
    fn test_upload_reader_reports_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let stream = Mutex::new(FormData::new().append_file(&path).stream());
        std::fs::write(&path, b"0123").unwrap();

        let (chunk_tx, mut chunks) = mpsc::channel(8);
        read_upload(&stream, 0, &chunk_tx);

        assert_eq!(chunks.try_recv().unwrap().unwrap(), Bytes::from_static(b"0123"));
        assert_eq!(chunks.try_recv().unwrap().unwrap_err(), NetError::UploadFileChanged);
        assert!(chunks.try_recv().is_err());
    }

    #[test]
    fn test_upload_reader_stops_after_rewind() {
        let stream = Mutex::new(FormData::from("abc").stream());
        lock_stream(&stream).refresh();

        let (chunk_tx, mut chunks) = mpsc::channel(8);
        read_upload(&stream, 0, &chunk_tx);
        assert!(chunks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gzip_decoded() {
        use async_compression::tokio::write::GzipEncoder;
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(b"compressed body").await.unwrap();
        encoder.shutdown().await.unwrap();
        let gz = encoder.into_inner();

        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            gz.len()
        )
        .into_bytes();
        response.extend_from_slice(&gz);
        let (port, _server) = serve(vec![response]).await;

        let mut t = transport();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let mut options = TransferOptions::new(Method::GET, url);
        options.accept_encoding = Some("gzip, deflate, br".to_string());
        t.add_transfer(options);

        let events = drain(&mut t).await;
        assert_eq!(body_of(&events), b"compressed body");
        match &events[0] {
            TransferEvent::Headers { headers, .. } => assert!(!headers.contains_key(CONTENT_ENCODING)),
            _ => panic!("expected headers first"),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_is_length_mismatch() {
        let (port, _server) =
            serve(vec![b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc".to_vec()]).await;
        let mut t = transport();
        t.add_transfer(TransferOptions::new(
            Method::GET,
            Url::parse(&format!("http://127.0.0.1:{port}/short")).unwrap(),
        ));

        let events = drain(&mut t).await;
        assert!(matches!(
            events.last(),
            Some(TransferEvent::Done {
                result: Err(NetError::ContentLengthMismatch),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_data_url_without_network() {
        let mut t = transport();
        t.add_transfer(TransferOptions::new(
            Method::GET,
            Url::parse("data:text/plain,hi").unwrap(),
        ));
        let events = drain(&mut t).await;
        assert_eq!(body_of(&events), b"hi");
        assert!(matches!(events.last(), Some(TransferEvent::Done { result: Ok(()), .. })));
    }

    #[tokio::test]
    async fn test_removed_transfer_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut t = transport();
        let id = t.add_transfer(TransferOptions::new(
            Method::GET,
            Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(),
        ));
        assert_eq!(t.perform(), 1);
        t.remove_transfer(id);
        assert_eq!(t.perform(), 0);
    }

    #[test]
    fn test_redirect_method_rules() {
        assert!(switches_to_get(StatusCode::SEE_OTHER, &Method::POST));
        assert!(!switches_to_get(StatusCode::SEE_OTHER, &Method::HEAD));
        assert!(switches_to_get(StatusCode::FOUND, &Method::POST));
        assert!(!switches_to_get(StatusCode::FOUND, &Method::PUT));
        assert!(!switches_to_get(StatusCode::TEMPORARY_REDIRECT, &Method::POST));
    }
}
