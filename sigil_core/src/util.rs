use sha2::{Digest, Sha256};

/// Hash a message shape down to a stable cache key.
///
/// Concatenates the categorical shape descriptor and the
/// placeholder-substituted token stream, then returns the hex-encoded
/// SHA-256 digest. Literal numeric values must already be masked out of
/// both inputs; the hash is a pure function of message structure.
#[must_use]
pub fn structural_hash(shape: &str, tokens: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(shape.as_bytes());
    hasher.update(b"|");
    hasher.update(tokens.as_bytes());
    format!("{:x}", hasher.finalize())
}
