//! Per-path registry of live sessions (spec §3/§4.4 `SessionManager`, C5).
//!
//! Map mutations take a single lock (`parking_lot::Mutex`, matching the
//! "single intrinsic lock" of spec §4.4); every fan-out (`broadcast`,
//! `broadping`, `sweep`) takes a *snapshot* under that lock and then
//! releases it before doing any I/O, so sends/pings never run while the
//! lock is held (spec §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::connection::{CloseEvent, Message, ReadyState, PROTOCOL_ERROR};
use crate::handshake::HandshakeContext;
use crate::session::Session;
use crate::session_id::SessionId;
use crate::state::{AtomicServerState, ServerState};

pub const SWEEP_PERIOD: Duration = Duration::from_secs(60);

pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    state: AtomicServerState,
    wait_time: Duration,
    keep_clean: bool,
    sweeping: AtomicBool,
}

impl SessionManager {
    pub fn new(wait_time: Duration, keep_clean: bool) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            state: AtomicServerState::new(ServerState::Ready),
            wait_time,
            keep_clean,
            sweeping: AtomicBool::new(false),
        }
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

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transitions `Ready -> Start`. Idempotent no-op (returns `false`) if
    /// not currently `Ready`.
    pub fn start(&self) -> bool {
        self.state.advance(ServerState::Start)
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Registers a new session, generating its id (spec §4.4 `add`).
    /// Returns `None` if the manager isn't `Start` — the caller is expected
    /// to close the connection with 1001 in that case (spec §4.3).
    pub fn add(
        &self,
        connection: crate::connection::Connection,
        context: Arc<HandshakeContext>,
    ) -> Option<Arc<Session>> {
        if self.state.load() != ServerState::Start {
            return None;
        }
        let id = SessionId::generate();
        let session = Arc::new(Session::new(id, connection, context));
        self.sessions.lock().insert(id, session.clone());
        trace!(%id, "session registered");
        Some(session)
    }

    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id).is_some();
        if removed {
            trace!(%id, "session removed");
        }
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Fan-out send to every currently-`Open` session (spec §4.4
    /// `broadcast`). A no-op when the manager isn't `Start` (testable
    /// property #6). Never propagates a per-session send failure out of
    /// the call site — it logs and continues.
    pub async fn broadcast(&self, message: Message, exclude: Option<SessionId>) {
        if self.state() != ServerState::Start {
            return;
        }
        let snapshot = self.snapshot();
        let sends = snapshot.into_iter().filter_map(|session| {
            if Some(session.id) == exclude || session.connection.ready_state() != ReadyState::Open
            {
                return None;
            }
            let message = message.clone();
            Some(async move {
                if let Err(err) = session.connection.send(message).await {
                    warn!(id = %session.id, %err, "broadcast send failed, skipping session");
                }
            })
        });
        join_all(sends).await;
    }

    /// Fan-out ping with a per-session timeout (spec §4.4 `broadping`).
    /// Failures (including "not Open") are represented as `false`, never
    /// thrown.
    pub async fn broadping(&self, payload: Bytes, timeout: Duration) -> HashMap<SessionId, bool> {
        let snapshot = self.snapshot();
        let results = join_all(snapshot.iter().map(|session| {
            let payload = payload.clone();
            async move { (session.id, session.connection.ping(payload, timeout).await) }
        }))
        .await;
        results.into_iter().collect()
    }

    /// `active_ids() == broadping(empty, wait_time)` filtered to `true`
    /// (spec §4.4).
    pub async fn active_ids(&self) -> Vec<SessionId> {
        self.broadping(Bytes::new(), self.wait_time)
            .await
            .into_iter()
            .filter_map(|(id, alive)| alive.then_some(id))
            .collect()
    }

    /// Complement of `active_ids()` (spec §4.4).
    pub async fn inactive_ids(&self) -> Vec<SessionId> {
        let active: std::collections::HashSet<_> = self.active_ids().await.into_iter().collect();
        self.snapshot()
            .into_iter()
            .map(|s| s.id)
            .filter(|id| !active.contains(id))
            .collect()
    }

    pub async fn close_session(&self, id: SessionId, code: u16, reason: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                let _ = session.connection.close(code, reason).await;
                true
            }
            None => false,
        }
    }

    pub async fn send_to(&self, id: SessionId, message: Message) -> bool {
        match self.get(id) {
            Some(session) => session.connection.send(message).await.is_ok(),
            None => false,
        }
    }

    pub fn send_to_async<F>(&self, id: SessionId, message: Message, completed: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        match self.get(id) {
            Some(session) => session.connection.send_async(message, completed),
            None => completed(false),
        }
    }

    /// One sweep tick (spec §4.9): snapshots inactive ids, then under the
    /// map lock closes sessions still `Open`, skips ones mid-`Closing`, and
    /// removes everything else. Re-entrancy is guarded by a single
    /// compare-and-set, not a queue (spec §9).
    pub async fn sweep(&self) {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sweep already in progress, skipping tick");
            return;
        }

        let inactive = self.inactive_ids().await;
        trace!(count = inactive.len(), "sweep found inactive sessions");

        for id in inactive {
            let session = self.get(id);
            if let Some(session) = session {
                match session.connection.ready_state() {
                    ReadyState::Open => {
                        let _ = session.connection.close(PROTOCOL_ERROR, "").await;
                        self.remove(id);
                    }
                    ReadyState::Closing => {}
                    ReadyState::Connecting | ReadyState::Closed => {
                        self.remove(id);
                    }
                }
            }
        }

        self.sweeping.store(false, Ordering::Release);
    }

    /// Drives `Start -> ShuttingDown -> Stop`: closes every live session
    /// with `event`, waiting up to `wait_time` per session, then clears the
    /// registry (spec §4.3 `Host.stop`, §4.4 terminal `stop`).
    pub async fn stop(&self, event: CloseEvent) {
        self.state.advance(ServerState::ShuttingDown);
        let snapshot = self.snapshot();
        let wait_time = self.wait_time;
        let closes = snapshot.iter().map(|session| {
            let event = event.clone();
            async move {
                let _ = tokio::time::timeout(
                    wait_time,
                    session.connection.close(event.code, &event.reason),
                )
                .await;
            }
        });
        join_all(closes).await;
        self.sessions.lock().clear();
        self.state.advance(ServerState::Stop);
    }

    /// Forced variant (spec `abort()`): no per-session wait, everyone is
    /// just marked closed.
    pub fn abort(&self) {
        self.state.advance(ServerState::ShuttingDown);
        for session in self.snapshot() {
            session.connection.force_closed();
        }
        self.sessions.lock().clear();
        self.state.advance(ServerState::Stop);
    }

    /// Spawns the periodic sweeper task (spec §4.9: 60s period, enabled iff
    /// `Start` and `keep_clean`). The returned handle aborts the task when
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweepHandle {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if manager.state() != ServerState::Start {
                    break;
                }
                if manager.keep_clean {
                    manager.sweep().await;
                }
            }
        });
        SweepHandle { task }
    }
}

/// Owns the sweeper task; dropping it (or calling [`SweepHandle::stop`])
/// cancels the timer.
pub struct SweepHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_when_not_started() {
        // A manager never started (`Ready`) must refuse registrations.
        let manager = SessionManager::new(Duration::from_millis(50), false);
        assert_eq!(manager.state(), ServerState::Ready);
    }

    #[tokio::test]
    async fn broadcast_is_noop_before_start() {
        let manager = SessionManager::new(Duration::from_millis(50), false);
        // No sessions registered (can't be, manager isn't Start), broadcast
        // must complete without panicking and touch nothing.
        manager
            .broadcast(Message::Text("hi".into()), None)
            .await;
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn start_is_idempotent_no_op_when_already_started() {
        let manager = SessionManager::new(Duration::from_millis(50), false);
        assert!(manager.start());
        assert!(!manager.start());
    }
}
