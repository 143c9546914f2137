//! The plain-vs-TLS socket union accepted connections run over. Kept as a
//! thin enum delegating to the two concrete stream types, the same shape
//! `tokio-tungstenite`'s own client-side `MaybeTlsStream` uses, specialized
//! to the server-accept path (`tokio_rustls::server::TlsStream`).
//!
//! Carries an optional sniffed-prefix buffer: the acceptor loop peeks the
//! request head (request line plus `Connection`/`Upgrade` headers) to
//! decide whether a connection is a WebSocket upgrade or a plain HTTP
//! request (spec §4.1/§4.8) before either collaborator has touched the
//! socket, and the bytes it read have to be replayed to whichever
//! collaborator ends up owning the connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
pub type TlsStream = tokio_rustls::server::TlsStream<TcpStream>;

enum Inner {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream>),
}

pub struct Transport {
    inner: Inner,
    prefix: Bytes,
}

impl Transport {
    pub fn plain(stream: TcpStream) -> Self {
        Self {
            inner: Inner::Plain(stream),
            prefix: Bytes::new(),
        }
    }

    #[cfg(feature = "tls")]
    pub fn tls(stream: TlsStream) -> Self {
        Self {
            inner: Inner::Tls(Box::new(stream)),
            prefix: Bytes::new(),
        }
    }

    /// Re-attaches bytes already consumed from the socket (e.g. by a
    /// request-head sniff) so the next reader sees them first.
    pub fn with_prefix(mut self, prefix: Bytes) -> Self {
        self.prefix = prefix;
        self
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix = this.prefix.split_off(n);
            return Poll::Ready(Ok(()));
        }
        match &mut this.inner {
            Inner::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Inner::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            Inner::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Inner::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Inner::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Inner::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// The request line plus the one header pair the classification step
/// (spec §4.1 "Upgrade to websocket -> handle_upgrade; otherwise ->
/// handle_http") needs to decide which collaborator owns the connection.
#[derive(Debug, PartialEq, Eq)]
pub struct SniffedRequest {
    pub method: String,
    pub path: String,
    /// `true` only when both `Connection: ... upgrade ...` and
    /// `Upgrade: websocket` are present, mirroring the check
    /// `axum::extract::ws::WebSocketUpgrade::from_request_parts` makes
    /// before ever treating a request as a WebSocket handshake.
    pub is_upgrade: bool,
}

/// Reads a fresh connection up through the blank line that ends the HTTP
/// header block, without consuming any bytes the eventual handler (the
/// WebSocket handshake or the plain HTTP dispatcher) still needs to see.
/// Returns the parsed request line plus everything read so it can be
/// replayed via [`Transport::with_prefix`] — both collaborators re-parse
/// the full head themselves; this only peeks enough to classify.
pub async fn sniff_request_head<S>(stream: &mut S) -> io::Result<(Bytes, Option<SniffedRequest>)>
where
    S: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        if let Some(head_end) = find_double_crlf(&buf) {
            let head = String::from_utf8_lossy(&buf[..head_end]);
            let mut lines = head.split("\r\n");
            let mut parts = lines.next().unwrap_or("").split_whitespace();
            let method = parts.next().map(str::to_string);
            let path = parts.next().map(str::to_string);

            let mut has_connection_upgrade = false;
            let mut has_upgrade_websocket = false;
            for line in lines {
                let Some((name, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match name.trim().to_ascii_lowercase().as_str() {
                    "connection" => {
                        has_connection_upgrade = value
                            .split(',')
                            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
                    }
                    "upgrade" => {
                        has_upgrade_websocket = value.eq_ignore_ascii_case("websocket");
                    }
                    _ => {}
                }
            }

            let parsed = match (method, path) {
                (Some(method), Some(path)) => Some(SniffedRequest {
                    method,
                    path,
                    is_upgrade: has_connection_upgrade && has_upgrade_websocket,
                }),
                _ => None,
            };
            return Ok((Bytes::from(buf), parsed));
        }
        if buf.len() > 16 * 1024 {
            return Ok((Bytes::from(buf), None));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((Bytes::from(buf), None));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sniff_recognizes_a_websocket_upgrade() {
        let mut cursor = std::io::Cursor::new(
            b"GET /chat?x=1 HTTP/1.1\r\nHost: x\r\nConnection: Keep-Alive, Upgrade\r\nUpgrade: websocket\r\n\r\n"
                .to_vec(),
        );
        let (prefix, parsed) = sniff_request_head(&mut cursor).await.unwrap();
        let parsed = parsed.unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/chat?x=1");
        assert!(parsed.is_upgrade);
        assert!(!prefix.is_empty());
    }

    #[tokio::test]
    async fn sniff_treats_a_plain_get_as_non_upgrade() {
        let mut cursor = std::io::Cursor::new(b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n".to_vec());
        let (_, parsed) = sniff_request_head(&mut cursor).await.unwrap();
        assert!(!parsed.unwrap().is_upgrade);
    }

    #[tokio::test]
    async fn sniff_requires_both_connection_and_upgrade_headers() {
        let mut cursor = std::io::Cursor::new(
            b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n".to_vec(),
        );
        let (_, parsed) = sniff_request_head(&mut cursor).await.unwrap();
        assert!(!parsed.unwrap().is_upgrade);
    }

    #[tokio::test]
    async fn sniff_handles_truncated_connection() {
        let mut cursor = std::io::Cursor::new(b"GE".to_vec());
        let (prefix, parsed) = sniff_request_head(&mut cursor).await.unwrap();
        assert_eq!(parsed, None);
        assert_eq!(&prefix[..], b"GE");
    }
}
