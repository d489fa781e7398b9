use alyx_storage::{FilesystemBackend, ObjectStore};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

pub const SESSION_DIR: &str = "cortexlab/Subjects/KS023/2019-12-10/001";

/// SHA-256 of data as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Deterministic pseudo-random bytes; the same seed gives the same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }
    Bytes::from(data)
}

/// A source and a destination filesystem repository in temp dirs.
pub struct TwoRepos {
    pub source_dir: TempDir,
    pub dest_dir: TempDir,
    pub source: Arc<dyn ObjectStore>,
    pub dest: Arc<dyn ObjectStore>,
}

impl TwoRepos {
    pub async fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let source: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(source_dir.path()).await.unwrap());
        let dest: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(dest_dir.path()).await.unwrap());
        Self {
            source_dir,
            dest_dir,
            source,
            dest,
        }
    }

    pub fn stores(&self) -> HashMap<String, Arc<dyn ObjectStore>> {
        HashMap::from([
            ("flatiron".to_string(), self.source.clone()),
            ("aws".to_string(), self.dest.clone()),
        ])
    }

    pub fn source_root(&self) -> String {
        self.source_dir.path().display().to_string()
    }

    pub fn dest_root(&self) -> String {
        self.dest_dir.path().display().to_string()
    }
}
