//! Challenge-response hashing.
//!
//! The server periodically sends `CHL 0 <nonce>`; the client must answer
//! with `QRY` carrying the lowercase-hex MD5 of the nonce concatenated with
//! the well-known product key, or the server drops the connection.

use md5::{Digest, Md5};

use msgr_protocol::CHALLENGE_PRODUCT_KEY;

/// Computes the `QRY` payload for a challenge nonce: 32 lowercase hex chars.
pub fn challenge_response(challenge: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(CHALLENGE_PRODUCT_KEY.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // MD5("15570131571988941333" + "Q1P7W2E4J9R8U3S5")
        assert_eq!(
            challenge_response("15570131571988941333"),
            "8f2f5a91b72102cd28355e9fc9000d6e"
        );
    }

    #[test]
    fn shape() {
        let digest = challenge_response("123");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn distinct_nonces_distinct_digests() {
        assert_ne!(challenge_response("a"), challenge_response("b"));
    }
}
