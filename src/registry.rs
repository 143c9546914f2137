//! Path -> `ServiceHost` table (spec §3/§4.2 `ServiceRegistry`, C7).
//!
//! A plain keyed map behind a single `RwLock`: lookups on the hot accept
//! path take the read side, `add`/`remove` take the write side. Path
//! canonicalization happens once, here, so every other component can
//! compare paths with plain string equality.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use tracing::{trace, warn};

use crate::connection::GOING_AWAY;
use crate::error::{Error, Result};
use crate::service_host::ServiceHost;
use crate::state::ServerState;

/// Normalizes a request or registration path (spec §4.2):
///
/// - must start with `/`
/// - `?` or `#` anywhere makes it invalid (query/fragment don't belong in a
///   registration or lookup key)
/// - percent-escapes are decoded
/// - exactly one trailing `/` is trimmed, unless the path is `/` itself
pub fn canonicalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if path.contains('?') || path.contains('#') {
        return Err(Error::InvalidPath(path.to_string()));
    }
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::InvalidPath(path.to_string()))?;
    let trimmed = if decoded.len() > 1 {
        decoded.strip_suffix('/').unwrap_or(&decoded)
    } else {
        decoded.as_ref()
    };
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    Ok(trimmed.to_string())
}

#[derive(Default)]
pub struct ServiceRegistry {
    hosts: RwLock<HashMap<String, Arc<ServiceHost>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `host` under `path` (spec §4.2 `add`). Rejects a path
    /// already in use. If the registry's own server is already `Start`
    /// (a host added after the server started, spec §4.1 allows adding
    /// paths post-start), the host is started immediately so it can begin
    /// accepting sessions right away.
    pub fn add(&self, path: &str, host: Arc<ServiceHost>, server_state: ServerState) -> Result<()> {
        let path = canonicalize_path(path)?;
        let mut hosts = self.hosts.write();
        if hosts.contains_key(&path) {
            return Err(Error::AlreadyInUse(path));
        }
        if server_state == ServerState::Start {
            host.start();
        }
        trace!(%path, "service host registered");
        hosts.insert(path, host);
        Ok(())
    }

    /// Unregisters the host at `path` (spec §4.2 `remove`), closing any
    /// sessions it still holds with 1001 ("going away") if it was running.
    pub async fn remove(&self, path: &str) -> bool {
        let path = match canonicalize_path(path) {
            Ok(path) => path,
            Err(_) => return false,
        };
        let removed = self.hosts.write().remove(&path);
        match removed {
            Some(host) => {
                if host.state() == ServerState::Start {
                    host.stop(GOING_AWAY, "").await;
                }
                trace!(%path, "service host removed");
                true
            }
            None => {
                warn!(%path, "remove() called for unregistered path");
                false
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<ServiceHost>> {
        let path = canonicalize_path(path).ok()?;
        self.hosts.read().get(&path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.hosts.read().keys().cloned().collect()
    }

    pub fn hosts(&self) -> Vec<Arc<ServiceHost>> {
        self.hosts.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_unchanged() {
        assert_eq!(canonicalize_path("/").unwrap(), "/");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(canonicalize_path("/chat/").unwrap(), "/chat");
    }

    #[test]
    fn only_one_trailing_slash_is_trimmed() {
        assert_eq!(canonicalize_path("/chat//").unwrap(), "/chat/");
    }

    #[test]
    fn percent_escapes_are_decoded() {
        assert_eq!(canonicalize_path("/ch%61t").unwrap(), "/chat");
    }

    #[test]
    fn missing_leading_slash_is_rejected() {
        assert!(canonicalize_path("chat").is_err());
    }

    #[test]
    fn query_and_fragment_are_rejected() {
        assert!(canonicalize_path("/chat?x=1").is_err());
        assert!(canonicalize_path("/chat#frag").is_err());
    }

    #[test]
    fn get_rejects_unregistered_path() {
        let registry = ServiceRegistry::new();
        assert!(registry.get("/chat").is_none());
    }
}
