//! One registered path: a behavior factory, its wait-time/keep-clean
//! policy, and its session manager (spec §3/§4.3 `ServiceHost`, C6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{trace, warn};

use crate::behavior::{Behavior, BehaviorFactory, SessionHandle};
use crate::connection::{self, CloseEvent, Message, GOING_AWAY};
use crate::error::Result;
use crate::handshake::HandshakeValidator;
use crate::session_manager::{SessionManager, SweepHandle};
use crate::state::{AtomicServerState, ServerState};
use crate::transport::Transport;

pub struct ServiceHost {
    path: String,
    factory: BehaviorFactory,
    wait_time: Duration,
    keep_clean: bool,
    pub(crate) sessions: Arc<SessionManager>,
    state: AtomicServerState,
    sweep: parking_lot::Mutex<Option<SweepHandle>>,
}

impl ServiceHost {
    pub fn new(path: String, factory: BehaviorFactory) -> Self {
        Self::with_options(path, factory, Duration::from_secs(1), true)
    }

    pub fn with_options(
        path: String,
        factory: BehaviorFactory,
        wait_time: Duration,
        keep_clean: bool,
    ) -> Self {
        Self {
            path,
            factory,
            wait_time,
            keep_clean,
            sessions: Arc::new(SessionManager::new(wait_time, keep_clean)),
            state: AtomicServerState::new(ServerState::Ready),
            sweep: parking_lot::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn keep_clean(&self) -> bool {
        self.keep_clean
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// `Ready -> Start`: starts the session manager and, if `keep_clean`,
    /// the sweeper (spec §4.3).
    pub fn start(&self) {
        if !self.state.advance(ServerState::Start) {
            warn!(path = %self.path, "start() called outside Ready, ignoring");
            return;
        }
        self.sessions.start();
        if self.keep_clean {
            *self.sweep.lock() = Some(self.sessions.spawn_sweeper());
        }
        trace!(path = %self.path, "service host started");
    }

    /// Drives the manager to `ShuttingDown` then `Stop`, fanning the close
    /// out to every live session with a bounded wait (spec §4.3).
    pub async fn stop(&self, code: u16, reason: &str) {
        self.sweep.lock().take();
        self.sessions
            .stop(CloseEvent {
                code,
                reason: reason.to_string(),
                was_clean: true,
            })
            .await;
        self.state.advance(ServerState::Stop);
        trace!(path = %self.path, "service host stopped");
    }

    pub fn abort(&self) {
        self.sweep.lock().take();
        self.sessions.abort();
        self.state.advance(ServerState::Stop);
    }

    /// Runs the handshake and, on success, spawns the per-connection
    /// worker that drives `on_open` -> (`on_message`|`on_error`)* ->
    /// `on_close` (spec §4.3 `start_session`).
    pub async fn start_session(
        self: &Arc<Self>,
        transport: Transport,
        remote_addr: SocketAddr,
        principal: Option<String>,
        config: WebSocketConfig,
    ) -> Result<()> {
        let mut behavior: Box<dyn Behavior> = (self.factory)();

        let validator = HandshakeValidator {
            host_validator: behavior
                .host_validator()
                .map(|f| -> Box<dyn Fn(&crate::handshake::HandshakeContext) -> bool + Send + Sync> {
                    Box::new(move |ctx| f(ctx))
                }),
            origin_validator: behavior.origin_validator().map(|f| {
                Box::new(move |origin| f(origin)) as Box<dyn Fn(Option<&str>) -> bool + Send + Sync>
            }),
            origin_required: behavior.origin_required(),
            cookies_validator: behavior.cookies_validator().map(|f| Box::new(move |cookies, out: &mut _| f(cookies, out))
                as Box<
                    dyn Fn(
                            &std::collections::HashMap<String, String>,
                            &mut crate::handshake::CookieOutBuilder,
                        ) -> bool
                        + Send
                        + Sync,
                >),
            ignore_extensions: behavior.ignore_extensions(),
            protocol: behavior.protocol(),
        };

        let accepted = connection::accept(transport, remote_addr, principal, config, &validator).await?;
        let connection::Accepted { connection, context } = accepted;
        let context = Arc::new(context);

        let host = Arc::clone(self);
        tokio::spawn(async move {
            host.drive_session(behavior, connection, context).await;
        });

        Ok(())
    }

    async fn drive_session(
        self: Arc<Self>,
        mut behavior: Box<dyn Behavior>,
        connection: crate::connection::Connection,
        context: Arc<crate::handshake::HandshakeContext>,
    ) {
        let emit_on_ping = behavior.emit_on_ping();

        let session = match self.sessions.add(connection.clone(), context) {
            Some(session) => session,
            None => {
                let _ = connection.close(GOING_AWAY, "").await;
                return;
            }
        };

        let handle = SessionHandle::new(session.id, connection.clone(), Arc::downgrade(&self.sessions));
        behavior.on_open(handle.clone()).await;

        let close_event = loop {
            match connection.recv(emit_on_ping).await {
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((1005, String::new()));
                    break CloseEvent { code, reason, was_clean: true };
                }
                Some(Ok(message)) => {
                    behavior.on_message(&handle, message).await;
                }
                Some(Err(err)) => {
                    behavior.on_error(&handle, err).await;
                    break CloseEvent {
                        code: crate::connection::ABNORMAL,
                        reason: String::new(),
                        was_clean: false,
                    };
                }
                None => {
                    break CloseEvent {
                        code: crate::connection::ABNORMAL,
                        reason: String::new(),
                        was_clean: connection.ready_state() == crate::connection::ReadyState::Closing,
                    };
                }
            }
        };

        self.sessions.remove(session.id);
        behavior.on_close(close_event).await;
    }
}
