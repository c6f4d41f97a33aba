//! Script fingerprinting.
//!
//! The ledger stores a short fingerprint of the script alongside each
//! applied version so content drift across applications of the same
//! version id is detectable.

use sha2::{Digest, Sha256};

/// Length of the stored fingerprint in hex characters.
pub const CHECKSUM_LEN: usize = 16;

/// Compute the fingerprint of a script: the first 16 hex characters of its
/// SHA-256 digest, over the exact bytes of the buffer.
pub fn script_checksum(sql: &str) -> String {
    let hash = Sha256::digest(sql.as_bytes());
    let mut hex = format!("{hash:x}");
    hex.truncate(CHECKSUM_LEN);
    hex
}
