//! The user-supplied application logic bound to one connection (spec §3/§4.7
//! `Behavior`). A `Behavior` is single-use: a fresh instance comes from its
//! [`crate::service_host::ServiceHost`]'s factory for every accepted
//! connection and is dropped after `on_close` — no pooling (spec §9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{CloseEvent, Connection, Message};
use crate::error::Error;
use crate::handshake::CookieOutBuilder;
use crate::session_manager::SessionManager;
use crate::session_id::SessionId;

pub type HostValidatorFn = Arc<dyn Fn(&crate::handshake::HandshakeContext) -> bool + Send + Sync>;
pub type OriginValidatorFn = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;
pub type CookiesValidatorFn =
    Arc<dyn Fn(&HashMap<String, String>, &mut CookieOutBuilder) -> bool + Send + Sync>;

/// Everything a `Behavior` can call on its own session, once `Open` (spec
/// §4.7). Calling any of these before `on_open` has run is impossible (the
/// handle doesn't exist yet); calling after `on_close` returns `NotStarted`
/// because the underlying connection has moved past `Open`.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub connection: Connection,
    manager: std::sync::Weak<SessionManager>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, connection: Connection, manager: std::sync::Weak<SessionManager>) -> Self {
        Self { id, connection, manager }
    }

    pub async fn send(&self, message: Message) -> Result<(), Error> {
        self.connection.send(message).await
    }

    pub fn send_async<F>(&self, message: Message, completed: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.connection.send_async(message, completed);
    }

    pub async fn ping(&self, payload: bytes::Bytes, timeout: std::time::Duration) -> bool {
        self.connection.ping(payload, timeout).await
    }

    pub async fn close(&self, code: u16, reason: &str) -> Result<CloseEvent, Error> {
        self.connection.close(code, reason).await
    }

    pub fn close_async(&self, code: u16, reason: String) {
        self.connection.close_async(code, reason);
    }

    /// Weak, lookup-only access to the session manager for this path (spec
    /// ownership summary: behaviors never own the manager).
    pub fn sessions(&self) -> Option<Arc<SessionManager>> {
        self.manager.upgrade()
    }
}

/// Application logic for one WebSocket connection (spec §4.7 `Behavior`).
///
/// The config methods all default to permissive/off (no host check, no
/// origin check, no cookie check, pings not surfaced, extensions
/// negotiated normally, no subprotocol) so a minimal behavior only needs
/// to implement the four callbacks.
#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    async fn on_open(&mut self, session: SessionHandle);
    async fn on_message(&mut self, session: &SessionHandle, message: Message);
    async fn on_error(&mut self, session: &SessionHandle, error: Error);
    async fn on_close(&mut self, event: CloseEvent);

    fn host_validator(&self) -> Option<HostValidatorFn> {
        None
    }

    fn origin_validator(&self) -> Option<OriginValidatorFn> {
        None
    }

    fn origin_required(&self) -> bool {
        false
    }

    fn cookies_validator(&self) -> Option<CookiesValidatorFn> {
        None
    }

    /// Surface inbound `Ping` frames to `on_message` in addition to the
    /// library's automatic `Pong` reply (spec §3 `emit_on_ping`).
    fn emit_on_ping(&self) -> bool {
        false
    }

    fn ignore_extensions(&self) -> bool {
        false
    }

    /// Subprotocol this behavior wants echoed back, if the client offers it.
    fn protocol(&self) -> Option<String> {
        None
    }
}

pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;
