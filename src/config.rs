//! Configuration surface (spec §6), parsed from CLI flags/env vars the way
//! `taceo-oprf-service`'s `OprfNodeConfig` is: one `clap` field per key,
//! durations via `humantime`.
//!
//! `ServerConfig` is consumed once, at [`crate::server::ServerController`]
//! construction; the hard core (connection, session, session manager) never
//! reads it directly, it only receives the already-validated values it
//! needs (`wait_time`, `keep_clean`, ...).

use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Authentication challenge scheme applied to the upgrade handshake.
///
/// Challenge *generation* is an external collaborator (spec §1); this enum
/// only selects which scheme the caller wants offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum AuthScheme {
    #[default]
    Anonymous,
    Basic,
    Digest,
}

#[derive(Parser, Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    #[clap(long, env = "WSD_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// TCP port to listen on.
    #[clap(long, env = "WSD_PORT")]
    pub port: u16,

    /// Force TLS on or off. Defaults to `port == 443` when unset.
    #[clap(long, env = "WSD_SECURE")]
    pub secure: Option<bool>,

    /// Root directory for the plain-HTTP file-serving collaborator.
    #[clap(long, env = "WSD_DOCUMENT_ROOT", default_value = "./Public")]
    pub document_root: String,

    /// Realm string presented by Basic/Digest auth challenges.
    #[clap(long, env = "WSD_REALM", default_value = "SECRET AREA")]
    pub realm: String,

    /// Authentication scheme applied before the upgrade handshake.
    #[clap(long, env = "WSD_AUTH_SCHEME", value_enum, default_value_t = AuthScheme::Anonymous)]
    pub auth_scheme: AuthScheme,

    /// Allow `SO_REUSEADDR` on the listening socket.
    #[clap(long, env = "WSD_REUSE_ADDRESS", default_value_t = false)]
    pub reuse_address: bool,

    /// Per-session wait time for pings and server-initiated closes.
    #[clap(
        long,
        env = "WSD_WAIT_TIME",
        default_value = "1s",
        value_parser = humantime::parse_duration,
    )]
    pub wait_time: Duration,

    /// Enable the periodic inactive-session sweeper.
    #[clap(long, env = "WSD_KEEP_CLEAN", default_value_t = true)]
    pub keep_clean: bool,
}

impl ServerConfig {
    /// Whether TLS should be enabled for this configuration: explicit
    /// override if set, otherwise `port == 443` (spec §6).
    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(self.port == 443)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidPort(self.port as u32));
        }
        if self.wait_time < Duration::from_millis(1) {
            return Err(Error::InvalidWaitTime(self.wait_time));
        }
        let root = self.document_root.trim_end_matches(['/', '\\']);
        if root.is_empty() || root == "/" {
            return Err(Error::InvalidPath(self.document_root.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 8080,
            secure: None,
            document_root: "./Public".into(),
            realm: "SECRET AREA".into(),
            auth_scheme: AuthScheme::Anonymous,
            reuse_address: false,
            wait_time: Duration::from_secs(1),
            keep_clean: true,
        }
    }

    #[test]
    fn secure_defaults_from_port() {
        let mut cfg = base();
        cfg.port = 443;
        assert!(cfg.is_secure());
        cfg.port = 8080;
        assert!(!cfg.is_secure());
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = base();
        cfg.port = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidPort(_))));
    }

    #[test]
    fn rejects_sub_millisecond_wait_time() {
        let mut cfg = base();
        cfg.wait_time = Duration::from_micros(100);
        assert!(matches!(cfg.validate(), Err(Error::InvalidWaitTime(_))));
    }

    #[test]
    fn rejects_root_document_root() {
        let mut cfg = base();
        cfg.document_root = "/".into();
        assert!(matches!(cfg.validate(), Err(Error::InvalidPath(_))));
    }
}
