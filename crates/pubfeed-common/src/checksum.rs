//! SHA-256 fingerprints of raw import content
//!
//! The importer keeps the raw bytes of every record next to the entity it
//! produced. The fingerprint is stored alongside so log lines and store rows
//! can be correlated without dumping the raw payload.

use crate::error::{PubfeedError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex encoded SHA-256 of a byte slice
pub fn fingerprint(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// Fingerprint any readable source without buffering it whole
pub fn fingerprint_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint a file on disk
pub fn fingerprint_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    fingerprint_reader(&mut file)
}

/// Check a file against a previously recorded fingerprint
pub fn verify_file(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = fingerprint_file(path)?;
    if actual == expected {
        Ok(())
    } else {
        Err(PubfeedError::FingerprintMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
