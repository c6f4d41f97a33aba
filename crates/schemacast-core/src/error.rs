#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Checksum mismatch for version {version_id}: metadata says {expected}, script hashes to {actual}")]
    ChecksumMismatch {
        version_id: String,
        expected: String,
        actual: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
