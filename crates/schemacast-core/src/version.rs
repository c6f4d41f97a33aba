//! Version metadata and the validated script payload.
//!
//! A version directory is produced by the external generator. The engine
//! only reads it: `metadata.json` plus `upgrade.sql` (and optionally
//! `downgrade.sql`). Validation happens once, at load time.

use serde::{Deserialize, Serialize};

use crate::checksum::script_checksum;
use crate::error::CoreError;

/// Contents of a version directory's `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    /// Opaque, globally unique id, e.g. `20260801_143000`.
    pub version_id: String,
    /// Revision id from the migration toolchain that produced the script.
    pub revision_id: Option<String>,
    /// Fingerprint of `upgrade.sql` as recorded by the generator.
    pub checksum: String,
    /// Human-readable description of the change.
    pub description: String,
    /// When the generator produced this version.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A validated script ready to be propagated: the SQL buffer plus the
/// identity it is stamped under.
#[derive(Debug, Clone)]
pub struct ScriptVersion {
    pub version_id: String,
    pub sql: String,
    pub checksum: String,
}

impl ScriptVersion {
    /// Build a validated script payload.
    ///
    /// Rejects empty SQL and recomputes the checksum over the buffer; a
    /// mismatch with `expected_checksum` means the artifact drifted from
    /// its metadata and the job must not run.
    pub fn new(
        version_id: impl Into<String>,
        sql: impl Into<String>,
        expected_checksum: &str,
    ) -> Result<Self, CoreError> {
        let version_id = version_id.into();
        let sql = sql.into();

        if sql.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "version {version_id} has an empty script"
            )));
        }

        let actual = script_checksum(&sql);
        if actual != expected_checksum {
            return Err(CoreError::ChecksumMismatch {
                version_id,
                expected: expected_checksum.to_string(),
                actual,
            });
        }

        Ok(Self {
            version_id,
            sql,
            checksum: actual,
        })
    }
}
