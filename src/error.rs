//! Crate-wide error type.
//!
//! `NotFound`-shaped outcomes (unknown session id, unknown service path) are
//! intentionally *not* variants here — they surface as `Option`/`bool`
//! return values at the call site instead, the same way a missing route
//! isn't an `Error` in most routing frameworks.

use crate::state::ServerState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid port {0}")]
    InvalidPort(u32),

    #[error("invalid service path `{0}`")]
    InvalidPath(String),

    #[error("wait_time must be at least 1ms, got {0:?}")]
    InvalidWaitTime(std::time::Duration),

    #[error("secure server requires a certificate but none was configured or found")]
    MissingCertificate,

    #[error("close reason must encode to at most 123 UTF-8 bytes, got {0}")]
    ReasonTooLong(usize),

    #[error("close code {0} is not allowed")]
    InvalidCloseCode(u16),

    #[error("service path `{0}` is already registered")]
    AlreadyInUse(String),

    #[error("operation requires state {expected}, server is in state {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: ServerState,
    },

    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: std::borrow::Cow<'static, str> },

    #[error("transport error")]
    Transport(#[from] std::io::Error),

    #[error("protocol error")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("operation not allowed before the session has reached Open")]
    NotStarted,
}
