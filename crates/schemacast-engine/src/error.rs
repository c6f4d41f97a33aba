use schemacast_core::error::CoreError;

/// Errors surfaced by the engine facade.
///
/// Per-target failures are never errors: workers reify them into
/// [`schemacast_core::outcome::Outcome`] values. This type covers the
/// submission path (artifact loading, catalog queries, validation) and
/// lookups against the job store.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error reading version artifacts: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No databases match pattern '{0}'")]
    NoTargets(String),

    #[error("Invalid metadata for version {version_id}: {message}")]
    InvalidMetadata { version_id: String, message: String },
}
