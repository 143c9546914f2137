//! Authentication is an external collaborator (spec §1: "authentication
//! challenge generation" is out of scope) — this crate never issues a
//! challenge or checks a credential itself. What it carries is the
//! *configuration surface* (`auth_scheme`, `realm`, a user-supplied
//! credentials finder) so an embedder's `Behavior::host_validator` can
//! enforce it, plus this one decode helper for the one encoding scheme
//! (`Basic`) simple enough that hand-rolling the check would otherwise be
//! duplicated by every embedder.

use base64::Engine;

/// Decodes a `Basic` `Authorization` header value (the part after
/// `"Basic "`) into `(username, password)`. Returns `None` on anything
/// malformed: not valid base64, not valid UTF-8, or missing the `:`
/// separator.
pub fn decode_basic_credentials(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_header() {
        // "alice:secret" base64-encoded.
        let header = "Basic YWxpY2U6c2VjcmV0";
        assert_eq!(
            decode_basic_credentials(header),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert_eq!(decode_basic_credentials("Digest foo"), None);
    }

    #[test]
    fn rejects_missing_separator() {
        // base64("nocolon")
        assert_eq!(decode_basic_credentials("Basic bm9jb2xvbg=="), None);
    }
}
