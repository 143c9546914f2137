//! The WebSocket connection state machine (spec §3 `WebSocket`, §4.6 `C2`).
//!
//! Framing itself — masking, fragmentation, the close handshake's byte
//! encoding — is delegated entirely to `tokio-tungstenite` (spec's C1
//! collaborator); this module only adds the `ready_state` machine, the
//! ping/pong correlation spec §4.4's `broadping` needs, and the close-code
//! validation spec §4.6 requires before a close is ever attempted.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use http::StatusCode;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::handshake::server::{
    Callback, ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
pub use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
pub use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::handshake::{split_offered_protocols, HandshakeContext, HandshakeValidator};
use crate::transport::Transport;

/// `ready_state`: monotonically nondecreasing (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    fn rank(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }
}

#[derive(Debug)]
struct AtomicReadyState(AtomicU8);

impl AtomicReadyState {
    fn new(s: ReadyState) -> Self {
        Self(AtomicU8::new(s.rank()))
    }

    fn load(&self) -> ReadyState {
        match self.0.load(Ordering::Acquire) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    /// Advances forward only; a store to a lower rank is silently ignored
    /// so concurrent close attempts can't move the state backward.
    fn advance(&self, next: ReadyState) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if next.rank() > current {
                    Some(next.rank())
                } else {
                    None
                }
            });
    }
}

/// Spec §3 `CloseEvent`.
#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

/// Validates a close code/reason pair against spec §4.6 before any close
/// frame is ever built: 1000-4999 allowed, 1010 forbidden server-side, 1005
/// must pair with an empty reason, reason <= 123 UTF-8 bytes.
pub fn validate_close(code: u16, reason: &str) -> Result<()> {
    if reason.len() > 123 {
        return Err(Error::ReasonTooLong(reason.len()));
    }
    if !(1000..=4999).contains(&code) {
        return Err(Error::InvalidCloseCode(code));
    }
    if code == 1010 {
        return Err(Error::InvalidCloseCode(code));
    }
    if code == 1005 && !reason.is_empty() {
        return Err(Error::InvalidCloseCode(code));
    }
    Ok(())
}

pub const GOING_AWAY: u16 = 1001;
pub const ABNORMAL: u16 = 1006;
pub const SERVER_ERROR: u16 = 1011;
pub const PROTOCOL_ERROR: u16 = 1002;

type WsStream = WebSocketStream<Transport>;

/// Outcome of a successful [`accept`]: the live connection plus the
/// handshake context the validator saw.
pub struct Accepted {
    pub connection: Connection,
    pub context: HandshakeContext,
}

struct ValidatingCallback<'a> {
    validator: &'a HandshakeValidator,
    remote_addr: SocketAddr,
    principal: Option<String>,
    out_context: Arc<SyncMutex<Option<HandshakeContext>>>,
    out_protocol: Arc<SyncMutex<Option<String>>>,
}

impl Callback for ValidatingCallback<'_> {
    fn on_request(
        self,
        request: &HsRequest,
        mut response: HsResponse,
    ) -> std::result::Result<HsResponse, ErrorResponse> {
        let ctx = build_context(request, self.remote_addr, self.principal);

        let offered = ctx
            .header_str("sec-websocket-protocol")
            .map(|h| split_offered_protocols(h).into_iter().map(String::from).collect::<Vec<_>>())
            .unwrap_or_default();
        let offered_refs: Vec<&str> = offered.iter().map(String::as_str).collect();

        match self.validator.run(&ctx, &offered_refs) {
            Ok((cookies, protocol)) => {
                for cookie in cookies {
                    if let Ok(value) = cookie.parse() {
                        response.headers_mut().append(http::header::SET_COOKIE, value);
                    }
                }
                if let Some(protocol) = &protocol {
                    if let Ok(value) = protocol.parse() {
                        response
                            .headers_mut()
                            .append(http::header::SEC_WEBSOCKET_PROTOCOL, value);
                    }
                }
                *self.out_protocol.lock() = protocol;
                *self.out_context.lock() = Some(ctx);
                Ok(response)
            }
            Err(_err) => {
                let resp: ErrorResponse = HsResponse::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(None)
                    .unwrap();
                Err(resp)
            }
        }
    }
}

fn build_context(
    request: &HsRequest,
    remote_addr: SocketAddr,
    principal: Option<String>,
) -> HandshakeContext {
    let uri = request.uri();
    let query = uri
        .query()
        .map(|q| {
            url_query_pairs(q)
                .into_iter()
                .collect::<std::collections::HashMap<_, _>>()
        })
        .unwrap_or_default();

    let cookies_in = request
        .headers()
        .get(http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookie_header)
        .unwrap_or_default();

    HandshakeContext {
        method: request.method().clone(),
        request_uri: uri.path().to_string(),
        host: request
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        origin: request
            .headers()
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        headers: request.headers().clone(),
        query,
        cookies_in,
        remote_addr,
        principal,
    }
}

fn url_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let k = parts.next().unwrap_or_default();
            let v = parts.next().unwrap_or_default();
            (
                percent_encoding::percent_decode_str(k)
                    .decode_utf8_lossy()
                    .into_owned(),
                percent_encoding::percent_decode_str(v)
                    .decode_utf8_lossy()
                    .into_owned(),
            )
        })
        .collect()
}

fn parse_cookie_header(header: &str) -> std::collections::HashMap<String, String> {
    header
        .split(';')
        .filter_map(|kv| {
            let mut parts = kv.trim().splitn(2, '=');
            let k = parts.next()?.trim();
            let v = parts.next()?.trim();
            if k.is_empty() {
                None
            } else {
                Some((k.to_string(), v.to_string()))
            }
        })
        .collect()
}

/// Runs the handshake (spec §4.6 `accept()`): validates, then upgrades.
pub async fn accept(
    transport: Transport,
    remote_addr: SocketAddr,
    principal: Option<String>,
    config: WebSocketConfig,
    validator: &HandshakeValidator,
) -> Result<Accepted> {
    let out_context = Arc::new(SyncMutex::new(None));
    let out_protocol = Arc::new(SyncMutex::new(None));

    let callback = ValidatingCallback {
        validator,
        remote_addr,
        principal,
        out_context: out_context.clone(),
        out_protocol: out_protocol.clone(),
    };

    let stream = tokio_tungstenite::accept_hdr_async_with_config(transport, callback, Some(config))
        .await
        .map_err(|err| match err {
            tokio_tungstenite::tungstenite::Error::Io(io_err) => Error::Transport(io_err),
            other => Error::HandshakeRejected {
                reason: other.to_string().into(),
            },
        })?;

    let context = out_context
        .lock()
        .take()
        .expect("callback always sets context on success");
    let protocol = out_protocol.lock().take();

    Ok(Accepted {
        connection: Connection::new(stream, protocol, validator.ignore_extensions),
        context,
    })
}

/// One send's message plus the callback to run once it's written (or fails
/// to be).
type SendJob = (Message, Box<dyn FnOnce(Result<()>) + Send>);

/// The live connection. Cheaply cloneable: every clone shares the same
/// underlying writer task/ready-state/ping-queue, matching "one Connection
/// per Session" while still letting the sweeper and the behavior both hold
/// a handle.
///
/// Writes don't lock a shared sink directly; they're handed to a single
/// writer task over an unbounded channel. Enqueueing is synchronous, so
/// `send`, `send_async`, and `close` calls issued in program order on one
/// `Connection` are always written to the wire in that same order,
/// regardless of how the tasks awaiting them happen to be scheduled (spec
/// §4.6/§5 "ordered with prior sends on this connection").
#[derive(Clone)]
pub struct Connection {
    sink_tx: mpsc::UnboundedSender<SendJob>,
    stream: Arc<AsyncMutex<SplitStream<WsStream>>>,
    ready_state: Arc<AtomicReadyState>,
    pending_pings: Arc<SyncMutex<VecDeque<oneshot::Sender<()>>>>,
    protocol: Option<String>,
    ignore_extensions: bool,
}

impl Connection {
    fn new(stream: WsStream, protocol: Option<String>, ignore_extensions: bool) -> Self {
        let (mut sink, read) = stream.split();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<SendJob>();
        tokio::spawn(async move {
            while let Some((message, completed)) = sink_rx.recv().await {
                let result = sink.send(message).await.map_err(Error::Protocol);
                completed(result);
            }
        });
        Self {
            sink_tx,
            stream: Arc::new(AsyncMutex::new(read)),
            ready_state: Arc::new(AtomicReadyState::new(ReadyState::Open)),
            pending_pings: Arc::new(SyncMutex::new(VecDeque::new())),
            protocol,
            ignore_extensions,
        }
    }

    /// Hands `message` to the writer task and waits for it to be written.
    /// If the writer task is already gone the failure is reported the same
    /// way a write error would be.
    async fn enqueue_send(&self, message: Message) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let job: SendJob = (message, Box::new(move |result| { let _ = tx.send(result); }));
        if let Err(mpsc::error::SendError((_, completed))) = self.sink_tx.send(job) {
            completed(Err(Error::NotStarted));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::NotStarted),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state.load()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn ignore_extensions(&self) -> bool {
        self.ignore_extensions
    }

    fn require_open(&self) -> Result<()> {
        if self.ready_state() == ReadyState::Open {
            Ok(())
        } else {
            Err(Error::NotStarted)
        }
    }

    /// Sends one frame. Never reorders relative to other sends issued on
    /// the same connection, including ones still in flight via
    /// `send_async` (spec §4.6).
    pub async fn send(&self, message: Message) -> Result<()> {
        self.require_open()?;
        self.enqueue_send(message).await
    }

    /// Fire-and-forget variant; `completed` runs once the write resolves.
    /// Ordering is preserved against every other `send`/`send_async`/
    /// `close` on this connection because the message is handed to the
    /// writer task synchronously, here, rather than from a newly spawned
    /// task that would race independently for a lock (spec §4.6/§5).
    pub fn send_async<F>(&self, message: Message, completed: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        if self.require_open().is_err() {
            completed(false);
            return;
        }
        let job: SendJob = (
            message,
            Box::new(move |result: Result<()>| completed(result.is_ok())),
        );
        if let Err(mpsc::error::SendError(job)) = self.sink_tx.send(job) {
            (job.1)(Err(Error::NotStarted));
        }
    }

    /// Sends a `Ping` and waits up to `timeout` for a matching `Pong`,
    /// correlated FIFO against the connection's single ordered stream
    /// (spec §4.4 `broadping`, §5 "every ping exposes a timeout").
    pub async fn ping(&self, payload: Bytes, timeout: Duration) -> bool {
        if self.require_open().is_err() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        self.pending_pings.lock().push_back(tx);
        if self.send(Message::Ping(payload)).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Pulls the next application-visible message, resolving outstanding
    /// pings against `Pong` frames and silently dropping `Ping` frames
    /// unless `emit_on_ping` asked for them (spec §4.6, §4.4).
    pub async fn recv(&self, emit_on_ping: bool) -> Option<std::result::Result<Message, Error>> {
        loop {
            let next = {
                let mut stream = self.stream.lock().await;
                stream.next().await
            };
            match next {
                Some(Ok(Message::Pong(_))) => {
                    if let Some(tx) = self.pending_pings.lock().pop_front() {
                        let _ = tx.send(());
                    }
                    continue;
                }
                Some(Ok(Message::Ping(_))) if !emit_on_ping => continue,
                Some(Ok(other)) => return Some(Ok(other)),
                Some(Err(err)) => return Some(Err(Error::Protocol(err))),
                None => return None,
            }
        }
    }

    /// Idempotent past `Closing` (spec §3 invariant).
    pub async fn close(&self, code: u16, reason: &str) -> Result<CloseEvent> {
        validate_close(code, reason)?;
        if self.ready_state().rank_at_least(ReadyState::Closing) {
            return Ok(CloseEvent {
                code,
                reason: reason.to_string(),
                was_clean: true,
            });
        }
        self.ready_state.advance(ReadyState::Closing);
        let frame = TungsteniteCloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        let result = self.enqueue_send(Message::Close(Some(frame))).await;
        self.ready_state.advance(ReadyState::Closed);
        match result {
            Ok(()) => Ok(CloseEvent {
                code,
                reason: reason.to_string(),
                was_clean: true,
            }),
            Err(_) => Ok(CloseEvent {
                code,
                reason: reason.to_string(),
                was_clean: false,
            }),
        }
    }

    pub fn close_async(&self, code: u16, reason: String) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.close(code, &reason).await;
        });
    }

    /// Forces the connection to `Closed` without attempting a clean
    /// handshake (spec's `abort()`/sweep 1006/1002 paths).
    pub fn force_closed(&self) {
        self.ready_state.advance(ReadyState::Closed);
    }
}

impl ReadyState {
    fn rank_at_least(self, other: ReadyState) -> bool {
        self.rank() >= other.rank()
    }
}
