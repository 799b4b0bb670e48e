use sha2::{Digest, Sha256};

/// Content hash used as the cache key of every compiled artifact.
pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}
