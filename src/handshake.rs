//! The upgrade request context (spec §3 `HandshakeContext`) and the
//! short-circuit validator pipeline (spec §4.5), grounded on the header
//! checks in `axum::extract::ws::WebSocketUpgrade::from_request_parts`
//! (`Connection: upgrade`, `Upgrade: websocket`, `Sec-WebSocket-Version`)
//! plus the origin/host/cookie/subprotocol checks spec.md adds on top.

use std::collections::HashMap;
use std::net::SocketAddr;

use http::{HeaderMap, Method};

use crate::error::{Error, Result};

/// Immutable snapshot of the upgrade request, built once and never mutated
/// afterward (spec §3).
#[derive(Debug, Clone)]
pub struct HandshakeContext {
    pub method: Method,
    pub request_uri: String,
    pub host: Option<String>,
    pub origin: Option<String>,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub cookies_in: HashMap<String, String>,
    pub remote_addr: SocketAddr,
    pub principal: Option<String>,
}

impl HandshakeContext {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Builder handed to the `cookies_validator` so it can append `Set-Cookie`
/// values to the eventual handshake response (spec §4.5 step 3).
#[derive(Debug, Default)]
pub struct CookieOutBuilder {
    cookies: Vec<String>,
}

impl CookieOutBuilder {
    pub fn push(&mut self, set_cookie: impl Into<String>) {
        self.cookies.push(set_cookie.into());
    }

    pub fn into_inner(self) -> Vec<String> {
        self.cookies
    }
}

type HostValidator = Box<dyn Fn(&HandshakeContext) -> bool + Send + Sync>;
type OriginValidator = Box<dyn Fn(Option<&str>) -> bool + Send + Sync>;
type CookiesValidator =
    Box<dyn Fn(&HashMap<String, String>, &mut CookieOutBuilder) -> bool + Send + Sync>;

/// The short-circuit validator pipeline (spec §4.5). Each stage is
/// optional; a `None` stage always passes.
#[derive(Default)]
pub struct HandshakeValidator {
    pub host_validator: Option<HostValidator>,
    pub origin_validator: Option<OriginValidator>,
    pub origin_required: bool,
    pub cookies_validator: Option<CookiesValidator>,
    pub ignore_extensions: bool,
    pub protocol: Option<String>,
}

impl HandshakeValidator {
    /// Runs the pipeline, first failure wins. On success returns the
    /// `Set-Cookie` values collected from the cookies validator and the
    /// negotiated subprotocol, if any.
    pub fn run(
        &self,
        ctx: &HandshakeContext,
        offered_protocols: &[&str],
    ) -> Result<(Vec<String>, Option<String>)> {
        if let Some(host_validator) = &self.host_validator {
            if !host_validator(ctx) {
                return Err(Error::HandshakeRejected {
                    reason: "invalid Host header".into(),
                });
            }
        }

        if let Some(origin_validator) = &self.origin_validator {
            let origin = ctx.origin.as_deref();
            if origin.is_none() && self.origin_required {
                return Err(Error::HandshakeRejected {
                    reason: "invalid Origin header".into(),
                });
            }
            if !origin_validator(origin) {
                return Err(Error::HandshakeRejected {
                    reason: "invalid Origin header".into(),
                });
            }
        }

        let mut cookie_out = CookieOutBuilder::default();
        if let Some(cookies_validator) = &self.cookies_validator {
            if !cookies_validator(&ctx.cookies_in, &mut cookie_out) {
                return Err(Error::HandshakeRejected {
                    reason: "invalid cookies".into(),
                });
            }
        }

        let negotiated = self.protocol.as_ref().and_then(|wanted| {
            offered_protocols
                .iter()
                .find(|offered| offered.trim() == wanted)
                .map(|_| wanted.clone())
        });

        Ok((cookie_out.into_inner(), negotiated))
    }
}

/// Parses the comma-separated `Sec-WebSocket-Protocol` header into trimmed
/// tokens.
pub fn split_offered_protocols(header: &str) -> Vec<&str> {
    header.split(',').map(str::trim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(origin: Option<&str>) -> HandshakeContext {
        HandshakeContext {
            method: Method::GET,
            request_uri: "/echo".into(),
            host: Some("example.test".into()),
            origin: origin.map(String::from),
            headers: HeaderMap::new(),
            query: HashMap::new(),
            cookies_in: HashMap::new(),
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            principal: None,
        }
    }

    #[test]
    fn origin_rejected_short_circuits() {
        let validator = HandshakeValidator {
            origin_validator: Some(Box::new(|origin| origin != Some("http://evil"))),
            ..Default::default()
        };
        let err = validator.run(&ctx(Some("http://evil")), &[]).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected { .. }));
    }

    #[test]
    fn host_checked_before_origin() {
        let validator = HandshakeValidator {
            host_validator: Some(Box::new(|_| false)),
            origin_validator: Some(Box::new(|_| false)),
            ..Default::default()
        };
        let err = validator.run(&ctx(None), &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            Error::HandshakeRejected {
                reason: "invalid Host header".into()
            }
            .to_string()
        );
    }

    #[test]
    fn subprotocol_echoed_when_offered() {
        let validator = HandshakeValidator {
            protocol: Some("chat".into()),
            ..Default::default()
        };
        let (_, negotiated) = validator.run(&ctx(None), &["chat", "other"]).unwrap();
        assert_eq!(negotiated.as_deref(), Some("chat"));
    }

    #[test]
    fn subprotocol_absent_when_not_offered() {
        let validator = HandshakeValidator {
            protocol: Some("chat".into()),
            ..Default::default()
        };
        let (_, negotiated) = validator.run(&ctx(None), &["other"]).unwrap();
        assert_eq!(negotiated, None);
    }
}
