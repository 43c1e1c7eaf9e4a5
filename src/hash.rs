// src/hash.rs

//! SHA-256 helpers for archive integrity and index checksums
//!
//! The pool records the SHA-256 of every archive it stores so that two
//! different files can never share a basename, and repository indexes are
//! published with a `.sha256sum` sidecar.

use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

/// Hash bytes, returning lowercase hex
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash everything a reader yields
///
/// Streams in fixed-size chunks so large archives are never held in memory.
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file on disk
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}
