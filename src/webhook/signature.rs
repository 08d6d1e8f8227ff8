// =============================================================================
// Webhook signature verification — HMAC-SHA256 over the raw body
// =============================================================================
//
// The sender computes HMAC-SHA256(secret, raw_body) and ships it as
// `X-Signature: sha256={hex}`. Verification is constant-time: the comparison
// examines every byte even after a mismatch so response timing reveals
// nothing about the expected digest.
// =============================================================================

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compare two byte slices in constant time. Returns `true` if identical.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Hex HMAC-SHA256 signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature header value against the raw body. Accepts the header
/// with or without the `sha256=` prefix; comparison is case-insensitive on
/// the hex digits and constant-time on the bytes.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let presented = header_value
        .strip_prefix("sha256=")
        .unwrap_or(header_value)
        .trim()
        .to_ascii_lowercase();

    let expected = sign(secret, body);
    constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn roundtrip_signature_verifies() {
        let body = br#"{"symbol":"ES","type":"confluence"}"#;
        let sig = sign(SECRET, body);
        assert!(verify(SECRET, body, &format!("sha256={sig}")));
    }

    #[test]
    fn prefix_is_optional() {
        let body = b"payload";
        let sig = sign(SECRET, body);
        assert!(verify(SECRET, body, &sig));
    }

    #[test]
    fn uppercase_hex_accepted() {
        let body = b"payload";
        let sig = sign(SECRET, body).to_uppercase();
        assert!(verify(SECRET, body, &format!("sha256={sig}")));
    }

    #[test]
    fn tampered_body_rejected() {
        let sig = sign(SECRET, b"original");
        assert!(!verify(SECRET, b"tampered", &format!("sha256={sig}")));
    }

    #[test]
    fn wrong_secret_rejected() {
        let sig = sign("other-secret", b"payload");
        assert!(!verify(SECRET, b"payload", &format!("sha256={sig}")));
    }

    #[test]
    fn empty_secret_always_rejects() {
        let sig = sign("", b"payload");
        assert!(!verify("", b"payload", &sig));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
