mod support;

use std::sync::Arc;

use async_trait::async_trait;
use wsd::{Behavior, CloseEvent, Error, Message, SessionHandle};

struct CloseAttemptBehavior;

#[async_trait]
impl Behavior for CloseAttemptBehavior {
    async fn on_open(&mut self, _session: SessionHandle) {}

    async fn on_message(&mut self, session: &SessionHandle, _message: Message) {
        // 1010 is reserved for client-only "mandatory extension" closes;
        // a server attempting it must get InvalidCloseCode back.
        let result = session.close(1010, "nope").await;
        let reply = match result {
            Err(Error::InvalidCloseCode(code)) => format!("rejected:{code}"),
            other => format!("unexpected:{other:?}"),
        };
        let _ = session.send(Message::Text(reply.into())).await;
    }

    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}
}

#[tokio::test]
async fn server_side_invalid_close_code_is_rejected_before_any_frame_is_sent() {
    let server = support::TestServer::start().await;
    server.add_service(
        "/close-check",
        Arc::new(|| Box::new(CloseAttemptBehavior) as Box<dyn Behavior>),
    );

    let mut client = server.connect("/close-check").await;
    support::send_text(&mut client, "trigger").await;
    assert_eq!(support::recv_text(&mut client).await, "rejected:1010");

    server.stop().await;
}

struct NoopBehavior;

#[async_trait]
impl Behavior for NoopBehavior {
    async fn on_open(&mut self, _session: SessionHandle) {}
    async fn on_message(&mut self, _session: &SessionHandle, _message: Message) {}
    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}
}

#[tokio::test]
async fn sweep_removes_a_session_that_stops_answering_pings() {
    let server = support::TestServer::start().await;
    let host = server
        .controller
        .add_service("/quiet", Arc::new(|| Box::new(NoopBehavior) as Box<dyn Behavior>))
        .expect("service registers");

    // Connect but never poll the client stream again: tungstenite only
    // answers pings automatically while something is driving the read side,
    // so this session will never produce a pong.
    let _client = server.connect("/quiet").await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(host.sessions().len(), 1);

    host.sessions().sweep().await;
    assert_eq!(host.sessions().len(), 0);

    server.stop().await;
}
