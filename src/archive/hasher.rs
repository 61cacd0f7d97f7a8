use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Streaming SHA-256 fingerprint of a file's bytes.
pub struct ContentHasher;

impl ContentHasher {
    const CHUNK_SIZE: usize = 64 * 1024;

    /// Hex digest of the whole file, read in fixed-size chunks so memory use
    /// doesn't depend on file size.
    pub fn digest_file(path: &Path) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; Self::CHUNK_SIZE];

        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}
