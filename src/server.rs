//! The embeddable entry point (spec §3/§4.1 `ServerController`, C9).
//!
//! Owns the listener, the per-path [`ServiceRegistry`], and the plain-HTTP
//! method table; drives the coordinated `Ready -> Start -> ShuttingDown ->
//! Stop` lifecycle across every registered [`ServiceHost`]. The acceptor
//! loop is grounded on the teacher's `axum::serve::WithGracefulShutdown`
//! (`tokio::select!` over `accept()` vs. a `watch`-based shutdown signal);
//! the tuned listener bind is grounded on the `socket2`-based acceptor
//! pattern used elsewhere in the wider WebSocket-server ecosystem the
//! retrieval pack surfaced (reuse-address is not exposed by
//! `tokio::net::TcpListener` directly).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "tls")]
use tokio_rustls::{rustls::ServerConfig as RustlsServerConfig, TlsAcceptor};

use crate::behavior::BehaviorFactory;
use crate::config::{AuthScheme, ServerConfig};
use crate::connection::SERVER_ERROR;
use crate::error::{Error, Result};
use crate::http::{HttpDispatcher, HttpMethod, BoxHttpHandler};
use crate::registry::ServiceRegistry;
use crate::service_host::ServiceHost;
use crate::state::{AtomicServerState, ServerState};
use crate::transport::{self, Transport};

pub type CredentialsFinder = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub struct ServerController {
    bind_address: IpAddr,
    port: u16,
    secure: bool,
    #[cfg(feature = "tls")]
    tls_config: Mutex<Option<Arc<RustlsServerConfig>>>,
    #[cfg(feature = "tls")]
    tls_acceptor: Mutex<Option<TlsAcceptor>>,
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<RwLock<HttpDispatcher>>,
    state: AtomicServerState,
    wait_time: Mutex<Duration>,
    keep_clean: Mutex<bool>,
    auth_scheme: Mutex<AuthScheme>,
    realm: Mutex<String>,
    reuse_address: Mutex<bool>,
    document_root: Mutex<String>,
    credentials_finder: Mutex<Option<CredentialsFinder>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    acceptor_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerController {
    pub fn new(bind_address: IpAddr, port: u16, secure: bool) -> Result<Self> {
        if port == 0 {
            return Err(Error::InvalidPort(port as u32));
        }
        Ok(Self {
            bind_address,
            port,
            secure,
            #[cfg(feature = "tls")]
            tls_config: Mutex::new(None),
            #[cfg(feature = "tls")]
            tls_acceptor: Mutex::new(None),
            registry: Arc::new(ServiceRegistry::new()),
            dispatcher: Arc::new(RwLock::new(HttpDispatcher::new())),
            state: AtomicServerState::new(ServerState::Ready),
            wait_time: Mutex::new(Duration::from_secs(1)),
            keep_clean: Mutex::new(true),
            auth_scheme: Mutex::new(AuthScheme::Anonymous),
            realm: Mutex::new("SECRET AREA".to_string()),
            reuse_address: Mutex::new(false),
            document_root: Mutex::new("./Public".to_string()),
            credentials_finder: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            acceptor_task: Mutex::new(None),
        })
    }

    /// Builds a controller from a parsed [`ServerConfig`], applying every
    /// config key through the same guarded setters a caller could use
    /// directly (spec §6 construct + set_* surface).
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let this = Self::new(config.bind_address, config.port, config.is_secure())?;
        this.set_wait_time(config.wait_time);
        this.set_keep_clean(config.keep_clean);
        this.set_auth_scheme(config.auth_scheme);
        this.set_realm(config.realm.clone());
        this.set_reuse_address(config.reuse_address);
        this.set_document_root(config.document_root.clone());
        Ok(this)
    }

    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn guard_ready(&self, what: &'static str) -> bool {
        if self.state.load() == ServerState::Ready {
            true
        } else {
            warn!(setting = what, state = ?self.state.load(), "setter ignored outside Ready");
            false
        }
    }

    pub fn set_wait_time(&self, wait_time: Duration) {
        if self.guard_ready("wait_time") {
            *self.wait_time.lock() = wait_time;
        }
    }

    pub fn set_keep_clean(&self, keep_clean: bool) {
        if self.guard_ready("keep_clean") {
            *self.keep_clean.lock() = keep_clean;
        }
    }

    pub fn set_auth_scheme(&self, scheme: AuthScheme) {
        if self.guard_ready("auth_scheme") {
            *self.auth_scheme.lock() = scheme;
        }
    }

    pub fn set_realm(&self, realm: String) {
        if self.guard_ready("realm") {
            *self.realm.lock() = realm;
        }
    }

    pub fn set_reuse_address(&self, reuse_address: bool) {
        if self.guard_ready("reuse_address") {
            *self.reuse_address.lock() = reuse_address;
        }
    }

    pub fn set_document_root(&self, document_root: String) {
        if self.guard_ready("document_root") {
            *self.document_root.lock() = document_root;
        }
    }

    /// Credential lookup used by an embedder's own `Behavior::host_validator`
    /// (spec §6 `user-credentials-finder`). This controller never calls it
    /// itself — authentication challenge generation is an external
    /// collaborator (spec §1); it only stores and hands back the callback,
    /// plus [`crate::auth::decode_basic_credentials`] to decode the one
    /// header format simple enough not to need its own collaborator.
    pub fn set_user_credentials_finder(&self, finder: CredentialsFinder) {
        if self.guard_ready("user_credentials_finder") {
            *self.credentials_finder.lock() = Some(finder);
        }
    }

    #[cfg(feature = "tls")]
    pub fn set_tls_config(&self, tls_config: Arc<RustlsServerConfig>) {
        if self.guard_ready("tls_config") {
            *self.tls_config.lock() = Some(tls_config);
        }
    }

    pub fn wait_time(&self) -> Duration {
        *self.wait_time.lock()
    }

    pub fn keep_clean(&self) -> bool {
        *self.keep_clean.lock()
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        *self.auth_scheme.lock()
    }

    pub fn realm(&self) -> String {
        self.realm.lock().clone()
    }

    pub fn reuse_address(&self) -> bool {
        *self.reuse_address.lock()
    }

    pub fn document_root(&self) -> String {
        self.document_root.lock().clone()
    }

    pub fn user_credentials_finder(&self) -> Option<CredentialsFinder> {
        self.credentials_finder.lock().clone()
    }

    /// Registers a plain-HTTP handler for `method` (spec §4.8). Unclaimed
    /// methods answer 501.
    pub fn on(&self, method: HttpMethod, handler: BoxHttpHandler) {
        self.dispatcher.write().on(method, handler);
    }

    /// Registers a new WebSocket service at `path` (spec §4.2 `add_service`).
    pub fn add_service(&self, path: &str, factory: BehaviorFactory) -> Result<Arc<ServiceHost>> {
        self.add_service_with(path, factory, |_| {})
    }

    /// Same as [`Self::add_service`], running `initializer` on the host
    /// before it's registered — the `initializer?` hook spec §4.2 allows for
    /// per-path customization (e.g. overriding `wait_time` for one path).
    pub fn add_service_with<F>(
        &self,
        path: &str,
        factory: BehaviorFactory,
        initializer: F,
    ) -> Result<Arc<ServiceHost>>
    where
        F: FnOnce(&ServiceHost),
    {
        let wait_time = self.wait_time();
        let keep_clean = self.keep_clean();
        let host = Arc::new(ServiceHost::with_options(path.to_string(), factory, wait_time, keep_clean));
        initializer(&host);
        self.registry.add(path, Arc::clone(&host), self.state.load())?;
        Ok(host)
    }

    pub async fn remove_service(&self, path: &str) -> bool {
        self.registry.remove(path).await
    }

    /// `Ready -> Start` (spec §4.1 `start()`). Starts every registered
    /// host's session manager, binds the listener, spawns the acceptor, then
    /// advances state. A listener bind failure rolls every host back to
    /// `Stop` with 1011 and the bind error is returned.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.state.load() != ServerState::Ready {
            return Err(Error::InvalidState {
                expected: "Ready",
                actual: self.state.load(),
            });
        }

        #[cfg(feature = "tls")]
        if self.secure {
            let cfg = self.tls_config.lock().clone().ok_or(Error::MissingCertificate)?;
            *self.tls_acceptor.lock() = Some(TlsAcceptor::from(cfg));
        }
        #[cfg(not(feature = "tls"))]
        if self.secure {
            return Err(Error::MissingCertificate);
        }

        for host in self.registry.hosts() {
            host.start();
        }

        let addr = SocketAddr::new(self.bind_address, self.port);
        let listener = match bind_listener(addr, self.reuse_address()) {
            Ok(listener) => listener,
            Err(err) => {
                self.rollback_hosts().await;
                return Err(Error::Transport(err));
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            this.accept_loop(listener, shutdown_rx).await;
        });
        *self.acceptor_task.lock() = Some(task);

        self.state.advance(ServerState::Start);
        info!(%addr, secure = self.secure, "server started");
        Ok(())
    }

    async fn rollback_hosts(&self) {
        let closes = self.registry.hosts().into_iter().map(|host| async move {
            host.stop(SERVER_ERROR, "listener failed to start").await;
        });
        join_all(closes).await;
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    trace!("acceptor loop received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                this.handle_connection(stream, remote_addr).await;
                            });
                        }
                        Err(err) => {
                            error!(%err, "accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        let _ = stream.set_nodelay(true);

        #[cfg(feature = "tls")]
        let mut transport = if self.secure {
            let acceptor = self.tls_acceptor.lock().clone();
            let acceptor = match acceptor {
                Some(acceptor) => acceptor,
                None => return,
            };
            match acceptor.accept(stream).await {
                Ok(tls_stream) => Transport::tls(tls_stream),
                Err(err) => {
                    debug!(%err, %remote_addr, "tls handshake failed");
                    return;
                }
            }
        } else {
            Transport::plain(stream)
        };
        #[cfg(not(feature = "tls"))]
        let mut transport = Transport::plain(stream);

        let (prefix, parsed) = match transport::sniff_request_head(&mut transport).await {
            Ok(v) => v,
            Err(err) => {
                debug!(%err, %remote_addr, "failed to read request head");
                return;
            }
        };
        let transport = transport.with_prefix(prefix);

        let Some(head) = parsed else {
            trace!(%remote_addr, "connection closed before a request head arrived");
            return;
        };

        let path = head.path.split(['?', '#']).next().unwrap_or("/").to_string();

        // (a) Upgrade to websocket -> handle_upgrade; (b) otherwise ->
        // handle_http (spec §4.1). Classification happens on the
        // Connection/Upgrade headers themselves, ahead of any path lookup,
        // so a plain GET to a registered WS path without upgrade headers
        // falls through to the plain-HTTP path instead of being fed into
        // the WebSocket handshake and silently dropped.
        if head.is_upgrade && head.method.eq_ignore_ascii_case("GET") {
            if let Some(host) = self.registry.get(&path) {
                let config = WebSocketConfig::default();
                if let Err(err) = host.start_session(transport, remote_addr, None, config).await {
                    debug!(%err, %path, %remote_addr, "handshake rejected");
                }
                return;
            }
        }

        self.dispatch_http(transport, remote_addr).await;
    }

    async fn dispatch_http(&self, transport: Transport, remote_addr: SocketAddr) {
        let io = TokioIo::new(transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        let service = service_fn(move |request: hyper::Request<Incoming>| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let handler = dispatcher.read().handler_for(request.method());
                let response = match handler {
                    Some(handler) => handler(request).await,
                    None => crate::http::not_implemented(),
                };
                Ok::<_, std::convert::Infallible>(response)
            }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!(%err, %remote_addr, "http/1 connection error");
        }
    }

    /// `Start -> ShuttingDown -> Stop` (spec §4.1 `stop(code, reason)`):
    /// signals the acceptor to stop taking new connections, fans the close
    /// out to every host, then joins the acceptor with a 5s grace period
    /// before forcing it down.
    pub async fn stop(&self, code: u16, reason: &str) {
        if self.state.load() != ServerState::Start {
            warn!(state = ?self.state.load(), "stop() called outside Start, ignoring");
            return;
        }
        self.state.advance(ServerState::ShuttingDown);

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }

        let closes = self.registry.hosts().into_iter().map(|host| {
            let reason = reason.to_string();
            async move { host.stop(code, &reason).await }
        });
        join_all(closes).await;

        if let Some(mut task) = self.acceptor_task.lock().take() {
            tokio::select! {
                res = &mut task => { let _ = res; }
                _ = tokio::time::sleep(Duration::from_secs(5)) => { task.abort(); }
            }
        }

        self.state.advance(ServerState::Stop);
        info!("server stopped");
    }

    /// Forced teardown, no per-session draining: every host is aborted with
    /// 1006 and the acceptor is killed immediately.
    pub fn abort(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.acceptor_task.lock().take() {
            task.abort();
        }
        for host in self.registry.hosts() {
            host.abort();
        }
        self.state.store(ServerState::Stop);
        warn!("server aborted");
    }
}

fn bind_listener(addr: SocketAddr, reuse_address: bool) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_port() {
        let result = ServerController::new("127.0.0.1".parse().unwrap(), 0, false);
        assert!(matches!(result, Err(Error::InvalidPort(_))));
    }

    #[test]
    fn new_controller_starts_ready() {
        let controller = ServerController::new("127.0.0.1".parse().unwrap(), 8080, false).unwrap();
        assert_eq!(controller.state(), ServerState::Ready);
    }

    #[test]
    fn setters_are_noop_outside_ready() {
        let controller = ServerController::new("127.0.0.1".parse().unwrap(), 8080, false).unwrap();
        controller.state.store(ServerState::Start);
        controller.set_wait_time(Duration::from_secs(9));
        assert_eq!(controller.wait_time(), Duration::from_secs(1));
    }
}
