mod support;

use std::sync::Arc;

use async_trait::async_trait;
use wsd::{Behavior, CloseEvent, Error, Message, SessionHandle};

struct EchoBehavior;

#[async_trait]
impl Behavior for EchoBehavior {
    async fn on_open(&mut self, _session: SessionHandle) {}

    async fn on_message(&mut self, session: &SessionHandle, message: Message) {
        let _ = session.send(message).await;
    }

    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}
}

struct BroadcastBehavior;

#[async_trait]
impl Behavior for BroadcastBehavior {
    async fn on_open(&mut self, _session: SessionHandle) {}

    async fn on_message(&mut self, session: &SessionHandle, message: Message) {
        if let Some(sessions) = session.sessions() {
            sessions.broadcast(message, Some(session.id)).await;
        }
    }

    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}
}

#[tokio::test]
async fn echoes_every_message_back_to_the_sender() {
    let server = support::TestServer::start().await;
    server.add_service("/echo", Arc::new(|| Box::new(EchoBehavior) as Box<dyn Behavior>));

    let mut client = server.connect("/echo").await;
    support::send_text(&mut client, "hello").await;
    assert_eq!(support::recv_text(&mut client).await, "hello");

    server.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_other_sessions_but_not_the_sender() {
    let server = support::TestServer::start().await;
    server.add_service(
        "/chat",
        Arc::new(|| Box::new(BroadcastBehavior) as Box<dyn Behavior>),
    );

    let mut a = server.connect("/chat").await;
    let mut b = server.connect("/chat").await;
    // let both registrations land before the broadcast fires.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    support::send_text(&mut a, "from a").await;
    assert_eq!(support::recv_text(&mut b).await, "from a");

    let no_echo = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        futures_util::StreamExt::next(&mut a),
    )
    .await;
    assert!(no_echo.is_err(), "sender must not receive its own broadcast");

    server.stop().await;
}
