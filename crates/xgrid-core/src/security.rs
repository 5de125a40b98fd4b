//! Request signing between the controller and node agents.
//!
//! Every authenticated call carries a hex-encoded HMAC-SHA256 of the raw
//! request body, or of the request path for bodyless requests. Agents sign
//! with [`NODE_SIGNATURE_HEADER`], the controller with
//! [`MASTER_SIGNATURE_HEADER`].

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying agent → controller signatures.
pub const NODE_SIGNATURE_HEADER: &str = "X-Node-Signature";

/// Header carrying controller → agent signatures.
pub const MASTER_SIGNATURE_HEADER: &str = "X-Master-Signature";

/// Size of a freshly issued node secret, in random bytes.
pub const NODE_SECRET_BYTES: usize = 32;

/// Length of a hex-encoded SHA-256 MAC.
const SIGNATURE_HEX_LEN: usize = 64;

fn keyed_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Compute the hex signature of `message` under `secret`.
pub fn sign(message: &[u8], secret: &str) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `signature` against `message` under `secret`.
///
/// Only the canonical lowercase hex form produced by [`sign`] is accepted.
/// The MAC comparison itself is constant-time.
pub fn verify(message: &[u8], secret: &str, signature: &str) -> bool {
    if signature.len() != SIGNATURE_HEX_LEN
        || !signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = keyed_mac(secret);
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Generate a hex-encoded secret from `byte_len` bytes of OS randomness.
pub fn generate_secret(byte_len: usize) -> Result<String, rand::Error> {
    let mut raw = vec![0u8; byte_len];
    OsRng.try_fill_bytes(&mut raw)?;
    Ok(hex::encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let sig = sign(b"{\"id\":\"n1\"}", "secret");
        assert_eq!(sig.len(), 64);
        assert!(verify(b"{\"id\":\"n1\"}", "secret", &sig));
    }

    #[test]
    fn empty_message_and_secret_round_trip() {
        let sig = sign(b"", "");
        assert!(verify(b"", "", &sig));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let sig = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn altered_message_fails() {
        let msg = b"/api/health".to_vec();
        let sig = sign(&msg, "s3cret");
        for i in 0..msg.len() {
            let mut tampered = msg.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, "s3cret", &sig), "byte {i} flip accepted");
        }
    }

    #[test]
    fn altered_secret_fails() {
        let sig = sign(b"payload", "s3cret");
        assert!(!verify(b"payload", "s3creT", &sig));
        assert!(!verify(b"payload", "s3cret ", &sig));
    }

    #[test]
    fn altered_signature_fails() {
        let sig = sign(b"payload", "s3cret");
        let bytes = sig.as_bytes();
        for i in 0..bytes.len() {
            let mut tampered = bytes.to_vec();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(!verify(b"payload", "s3cret", &tampered));
        }
        assert!(!verify(b"payload", "s3cret", &sig.to_uppercase()));
        assert!(!verify(b"payload", "s3cret", &sig[..63]));
        assert!(!verify(b"payload", "s3cret", ""));
    }

    #[test]
    fn generated_secrets_are_hex_and_unique() {
        let a = generate_secret(NODE_SECRET_BYTES).unwrap();
        let b = generate_secret(NODE_SECRET_BYTES).unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
