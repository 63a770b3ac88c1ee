//! Checksum computation for verify-after-copy.
//!
//! Change detection never looks at content; checksums are only used to
//! confirm that a file landed on the destination intact.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::Digest;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "Invalid hash algorithm '{}'. Must be 'sha256' or 'blake3'",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

enum Hasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finalize(self) -> ChecksumValue {
        match self {
            Hasher::Sha256(hasher) => ChecksumValue {
                algorithm: ChecksumAlgorithm::Sha256,
                hex: format!("{:x}", hasher.finalize()),
            },
            Hasher::Blake3(hasher) => ChecksumValue {
                algorithm: ChecksumAlgorithm::Blake3,
                hex: hasher.finalize().to_hex().to_string(),
            },
        }
    }
}

/// Compute the checksum of a file, streaming it in 64 KB blocks.
fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> io::Result<ChecksumValue> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        match file.read(&mut buffer)? {
            0 => break,
            n => hasher.update(&buffer[..n]),
        }
    }
    Ok(hasher.finalize())
}

/// Compare source and destination checksums. Returns true if they match.
pub fn verify_copy(src: &Path, dst: &Path, algorithm: ChecksumAlgorithm) -> io::Result<bool> {
    let source = compute_file_checksum(src, algorithm)?;
    let destination = compute_file_checksum(dst, algorithm)?;
    Ok(source == destination)
}
