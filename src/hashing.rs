//! Digest function injected into the rule compiler for bucketing.

use std::sync::Arc;

use sha1::{Digest, Sha1};

/// A 160-bit digest.
pub type Digest160 = [u8; 20];

/// Pure, deterministic `bytes → digest` function.
pub type HashProvider = Arc<dyn Fn(&[u8]) -> Digest160 + Send + Sync>;

pub fn sha1_digest(bytes: &[u8]) -> Digest160 {
    Sha1::digest(bytes).into()
}

pub fn sha1_provider() -> HashProvider {
    Arc::new(sha1_digest)
}

/// Read the first eight digest bytes as a little-endian bucket number.
pub fn bucket_of(digest: &Digest160) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}
