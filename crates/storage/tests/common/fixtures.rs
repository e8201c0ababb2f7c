use bytes::Bytes;
use pkgedit_storage::FilesystemBackend;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tempfile::TempDir;

/// Filesystem backend rooted in a temp directory that lives as long as the wrapper.
pub struct TestStorage {
    pub backend: Arc<FilesystemBackend>,
    pub dir: TempDir,
}

impl TestStorage {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
        Self {
            backend: Arc::new(backend),
            dir,
        }
    }
}

/// Compute SHA-256 hash of data as hex string
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate deterministic archive-sized payloads; same seed, same bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}
