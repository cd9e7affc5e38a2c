//! The transfer layer under the resource handle manager.
//!
//! A [`Transport`] runs transfers described by [`TransferOptions`] and reports
//! progress as [`TransferEvent`]s. The manager never blocks on it: it adds and
//! removes transfers, calls [`Transport::perform`] once per pump and drains
//! [`Transport::read_events`].
//!
//! - [`hyper`]: production transport over hyper HTTP/1.1 connections
//! - [`local`]: `file:` and `data:` loads
//! - [`share`]: locks around state shared by all transfers

pub mod hyper;
pub mod local;
pub mod share;

use crate::base::neterror::NetError;
use crate::http::formdata::FormDataStream;
use crate::socket::proxy::ProxySettings;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use share::ShareLocks;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use self::hyper::HyperTransport;

/// Identifies one transfer. Never reused by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Everything a transport needs to run one request.
#[derive(Debug)]
pub struct TransferOptions {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<FormDataStream>,
    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// Limit on the whole transfer.
    pub timeout: Option<Duration>,
    pub verify_peer: bool,
    /// `None` for a direct connection.
    pub proxy: Option<ProxySettings>,
    /// Follow redirects inside the transport instead of reporting them.
    pub follow_redirects: bool,
    pub max_redirects: u32,
    /// Advertised codings; responses in one of them are decoded.
    pub accept_encoding: Option<String>,
    /// Attach and store cookies through the shared jar.
    pub use_cookies: bool,
    /// Serialize connection setup on the shared connect lock.
    pub serialize_connect: bool,
}

impl TransferOptions {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            dns_timeout: None,
            connect_timeout: None,
            timeout: None,
            verify_peer: true,
            proxy: None,
            follow_redirects: false,
            max_redirects: 0,
            accept_encoding: None,
            use_cookies: true,
            serialize_connect: false,
        }
    }
}

/// Progress of a transfer, in the order it happened.
#[derive(Debug)]
pub enum TransferEvent {
    /// Final response head. `url` is where it came from after any
    /// transport-side redirects.
    Headers {
        id: TransferId,
        url: Url,
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
    },
    Data {
        id: TransferId,
        data: Bytes,
    },
    UploadProgress {
        id: TransferId,
        sent: u64,
        total: u64,
    },
    Done {
        id: TransferId,
        result: Result<(), NetError>,
    },
}

impl TransferEvent {
    pub fn id(&self) -> TransferId {
        match self {
            TransferEvent::Headers { id, .. }
            | TransferEvent::Data { id, .. }
            | TransferEvent::UploadProgress { id, .. }
            | TransferEvent::Done { id, .. } => *id,
        }
    }
}

/// A multiplexed transfer engine.
pub trait Transport {
    /// Start a transfer.
    fn add_transfer(&mut self, options: TransferOptions) -> TransferId;

    /// Stop a transfer. Events it already queued may still be read.
    fn remove_transfer(&mut self, id: TransferId);

    /// Advance transfers once without blocking. Returns how many are live.
    fn perform(&mut self) -> usize;

    /// Drain queued events.
    fn read_events(&mut self) -> Vec<TransferEvent>;

    /// Locks shared by this transport's transfers.
    fn share_locks(&self) -> Arc<ShareLocks>;

    /// An independent single-connection transport sharing the same locks,
    /// for synchronous loads.
    fn isolated(&self) -> Result<Self, NetError>
    where
        Self: Sized;
}
