//! Checksum helpers
//!
//! Source archives and bottles are identified by SHA-256; BLAKE3 is reported
//! alongside it for installed files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 65536;

fn stream_file<P, F>(path: P, mut update: F) -> std::io::Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&[u8]),
{
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        update(&buffer[..bytes_read]);
    }
    Ok(())
}

/// Compute the SHA-256 of a file as lowercase hex
pub fn sha256sum<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    stream_file(path, |chunk| hasher.update(chunk))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the BLAKE3 hash of a file as lowercase hex
pub fn b3sum<P: AsRef<Path>>(path: P) -> std::io::Result<String> {
    let mut hasher = Blake3Hasher::new();
    stream_file(path, |chunk| {
        hasher.update(chunk);
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute both checksums for a file
pub fn compute_checksums<P: AsRef<Path>>(path: P) -> std::io::Result<Checksums> {
    let path = path.as_ref();
    Ok(Checksums {
        sha256: sha256sum(path)?,
        b3sum: b3sum(path)?,
    })
}

/// Whether `value` looks like a SHA-256 digest (64 lowercase hex characters)
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksums {
    pub sha256: String,
    pub b3sum: String,
}

impl Checksums {
    /// Compare against a declared SHA-256, ignoring case
    pub fn matches_sha256(&self, expected: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(expected.trim())
    }
}
