//! Shared end-to-end harness: spins up a real [`wsd::ServerController`] on
//! loopback and drives it with a real `tokio-tungstenite` client — no mocked
//! transport, mirroring `TaceoLabs-oprf-service`'s `tests/setup.rs`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use wsd::{BehaviorFactory, ServerController};

static NEXT_PORT: AtomicU16 = AtomicU16::new(31_000);

pub fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::Relaxed)
}

pub type TestClient =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub controller: Arc<ServerController>,
    pub port: u16,
}

impl TestServer {
    pub async fn start() -> Self {
        let port = next_port();
        let controller = Arc::new(
            ServerController::new("127.0.0.1".parse().unwrap(), port, false)
                .expect("valid port"),
        );
        controller.start().await.expect("server starts");
        // give the acceptor a moment to be selected onto the listener.
        tokio::time::sleep(Duration::from_millis(10)).await;
        Self { controller, port }
    }

    pub fn add_service(&self, path: &str, factory: BehaviorFactory) {
        self.controller
            .add_service(path, factory)
            .expect("service registers");
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn connect(&self, path: &str) -> TestClient {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url(path))
            .await
            .expect("client connects");
        stream
    }

    pub async fn try_connect(&self, path: &str) -> Result<TestClient, tokio_tungstenite::tungstenite::Error> {
        tokio_tungstenite::connect_async(self.url(path))
            .await
            .map(|(stream, _)| stream)
    }

    pub async fn stop(&self) {
        self.controller.stop(1001, "test teardown").await;
    }
}

pub async fn recv_text(client: &mut TestClient) -> String {
    match tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("message arrives before timeout")
        .expect("stream not closed")
        .expect("frame decodes")
    {
        Message::Text(text) => text.as_str().to_string(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

pub async fn send_text(client: &mut TestClient, text: &str) {
    client
        .send(Message::Text(text.to_string().into()))
        .await
        .expect("send succeeds");
}
