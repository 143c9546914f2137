//! The registry-visible half of a live session (spec §3 `Session`).
//!
//! The `Behavior` instance itself is *not* stored here: it is owned and
//! driven exclusively by the per-connection worker task spawned in
//! [`crate::service_host::ServiceHost::start_session`], which matches the
//! ownership note in spec §3 that behaviors hold only a weak, lookup-only
//! reference back to the manager. What the manager needs to broadcast,
//! ping, and close sessions is just the `id`, the `Connection`, and the
//! immutable handshake context — exactly what this struct carries.

use std::sync::Arc;
use std::time::Instant;

use crate::connection::Connection;
use crate::handshake::HandshakeContext;
use crate::session_id::SessionId;

pub struct Session {
    pub id: SessionId,
    pub connection: Connection,
    pub start_time: Instant,
    pub context: Arc<HandshakeContext>,
}

impl Session {
    pub fn new(id: SessionId, connection: Connection, context: Arc<HandshakeContext>) -> Self {
        Self {
            id,
            connection,
            start_time: Instant::now(),
            context,
        }
    }
}
