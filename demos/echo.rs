//! Minimal echo-and-broadcast server exercising the public API end to end.
//!
//! Run with
//!
//! ```
//! RUST_LOG=wsd=trace cargo run --example echo -- --port 9001
//! ```
//!
//! Connect with any WebSocket client to `ws://127.0.0.1:9001/echo` and every
//! message sent is echoed back to the sender and broadcast to every other
//! connected client on the same path.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use wsd::{Behavior, CloseEvent, Error, Message, ServerConfig, ServerController, SessionHandle};

struct EchoBehavior;

#[async_trait]
impl Behavior for EchoBehavior {
    async fn on_open(&mut self, session: SessionHandle) {
        tracing::info!(id = %session.id, "client connected");
    }

    async fn on_message(&mut self, session: &SessionHandle, message: Message) {
        if let Err(err) = session.send(message.clone()).await {
            tracing::warn!(%err, id = %session.id, "echo failed");
            return;
        }
        if let Some(sessions) = session.sessions() {
            sessions.broadcast(message, Some(session.id)).await;
        }
    }

    async fn on_error(&mut self, session: &SessionHandle, error: Error) {
        tracing::warn!(%error, id = %session.id, "connection error");
    }

    async fn on_close(&mut self, event: CloseEvent) {
        tracing::info!(code = event.code, reason = %event.reason, "client disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::parse();
    let controller = Arc::new(ServerController::from_config(&config)?);

    controller.add_service("/echo", Arc::new(|| Box::new(EchoBehavior) as Box<dyn Behavior>))?;

    controller.start().await?;
    tracing::info!(port = config.port, "echo server listening, path /echo");

    tokio::signal::ctrl_c().await?;
    controller.stop(1001, "shutting down").await;
    Ok(())
}
