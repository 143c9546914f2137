mod support;

use std::sync::Arc;

use async_trait::async_trait;
use wsd::{Behavior, CloseEvent, Error, Message, SessionHandle};

struct NoopBehavior;

#[async_trait]
impl Behavior for NoopBehavior {
    async fn on_open(&mut self, _session: SessionHandle) {}
    async fn on_message(&mut self, _session: &SessionHandle, _message: Message) {}
    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}
}

fn noop_factory() -> Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync> {
    Arc::new(|| Box::new(NoopBehavior) as Box<dyn Behavior>)
}

#[tokio::test]
async fn registering_the_same_path_twice_fails() {
    let server = support::TestServer::start().await;
    server.add_service("/chat", noop_factory());

    let second = server.controller.add_service("/chat", noop_factory());
    assert!(matches!(second, Err(Error::AlreadyInUse(_))));

    server.stop().await;
}

#[tokio::test]
async fn trailing_slash_and_percent_escapes_resolve_to_the_same_path() {
    let server = support::TestServer::start().await;
    server.add_service("/chat", noop_factory());

    // "/chat/" and "/ch%61t" both canonicalize to "/chat" and should collide.
    let via_slash = server.controller.add_service("/chat/", noop_factory());
    assert!(matches!(via_slash, Err(Error::AlreadyInUse(_))));

    let via_escape = server.controller.add_service("/ch%61t", noop_factory());
    assert!(matches!(via_escape, Err(Error::AlreadyInUse(_))));

    // but a client connecting through either alias reaches the registered host.
    let client = server.try_connect("/chat/").await;
    assert!(client.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn connecting_to_an_unregistered_path_is_rejected() {
    let server = support::TestServer::start().await;
    server.add_service("/chat", noop_factory());

    let result = server.try_connect("/does-not-exist").await;
    assert!(result.is_err());

    server.stop().await;
}

struct RejectAllOrigins;

#[async_trait]
impl Behavior for RejectAllOrigins {
    async fn on_open(&mut self, _session: SessionHandle) {}
    async fn on_message(&mut self, _session: &SessionHandle, _message: Message) {}
    async fn on_error(&mut self, _session: &SessionHandle, _error: Error) {}
    async fn on_close(&mut self, _event: CloseEvent) {}

    fn origin_validator(&self) -> Option<wsd::behavior::OriginValidatorFn> {
        Some(Arc::new(|_origin| false))
    }
}

#[tokio::test]
async fn host_validator_rejection_fails_the_handshake() {
    let server = support::TestServer::start().await;
    server.add_service(
        "/guarded",
        Arc::new(|| Box::new(RejectAllOrigins) as Box<dyn Behavior>),
    );

    let result = server.try_connect("/guarded").await;
    assert!(result.is_err());

    server.stop().await;
}
