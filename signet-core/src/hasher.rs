//! Content hashing for signature tables
//!
//! Digests are SHA-256, written as `sha256:` followed by 64 lowercase hex
//! digits. The build machine and the machine running the launcher must agree
//! on this encoding byte for byte.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Prefix naming the digest algorithm
pub const DIGEST_PREFIX: &str = "sha256:";

/// Length of an encoded digest
pub const DIGEST_LEN: usize = DIGEST_PREFIX.len() + 64;

/// Hash a byte slice
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    encode(hasher)
}

/// Hash a string using SHA-256
pub fn hash_string(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// Hash a file's contents, streaming it in 8 KiB chunks
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(encode(hasher))
}

/// Compare two encoded digests
///
/// Hex digits compare case-insensitively so hand-edited tables still match.
pub fn digests_equal(expected: &str, actual: &str) -> bool {
    expected.len() == actual.len() && expected.eq_ignore_ascii_case(actual)
}

/// Check that a string is a well-formed encoded digest
pub fn is_digest(value: &str) -> bool {
    value.len() == DIGEST_LEN
        && value.starts_with(DIGEST_PREFIX)
        && value[DIGEST_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

fn encode(hasher: Sha256) -> String {
    format!("{DIGEST_PREFIX}{}", hex::encode(hasher.finalize()))
}
