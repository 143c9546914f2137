//! `wsd`: an embeddable multi-service WebSocket server.
//!
//! A single [`server::ServerController`] owns one TCP (optionally TLS)
//! listener and dispatches each accepted connection either to the plain-HTTP
//! method table or, for paths registered via
//! [`server::ServerController::add_service`], to a per-path
//! [`service_host::ServiceHost`] that upgrades the connection and hands it
//! to a fresh [`behavior::Behavior`] instance. Each host tracks its own live
//! sessions through a [`session_manager::SessionManager`] (broadcast, ping,
//! sweep) independently of every other registered path.

pub mod auth;
pub mod behavior;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod http;
pub mod registry;
pub mod server;
pub mod service_host;
pub mod session;
pub mod session_id;
pub mod session_manager;
pub mod state;
pub mod transport;

pub use behavior::{Behavior, BehaviorFactory, SessionHandle};
pub use config::{AuthScheme, ServerConfig};
pub use connection::{CloseEvent, Connection, Message, ReadyState};
pub use error::{Error, Result};
pub use handshake::{CookieOutBuilder, HandshakeContext, HandshakeValidator};
pub use http::{HttpDispatcher, HttpMethod};
pub use registry::ServiceRegistry;
pub use server::ServerController;
pub use service_host::ServiceHost;
pub use session::Session;
pub use session_id::SessionId;
pub use session_manager::SessionManager;
pub use state::ServerState;
