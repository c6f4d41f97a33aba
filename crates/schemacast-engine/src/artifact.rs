//! Version artifact store: the read side of the generator boundary.
//!
//! The external generator writes one directory per version:
//!
//! ```text
//! <versions_dir>/<version_id>/
//!     upgrade.sql       (required)
//!     downgrade.sql     (optional)
//!     metadata.json     (version_id, revision_id, checksum, description)
//! ```
//!
//! The engine only ever reads these. Validation happens at load time: the
//! script must be non-empty and its recomputed checksum must match the
//! metadata, otherwise the job is rejected before any target is touched.

use std::path::{Path, PathBuf};

use schemacast_core::version::{ScriptVersion, VersionMeta};

use crate::error::EngineError;

const UPGRADE_FILE: &str = "upgrade.sql";
const DOWNGRADE_FILE: &str = "downgrade.sql";
const METADATA_FILE: &str = "metadata.json";

/// A fully loaded version directory.
#[derive(Debug, Clone)]
pub struct VersionArtifact {
    pub meta: VersionMeta,
    pub upgrade_sql: String,
    pub downgrade_sql: Option<String>,
}

/// Read access to the versions directory.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// List the metadata of every version, newest id first.
    ///
    /// Directories without a parseable `metadata.json` are skipped with a
    /// warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<VersionMeta>, EngineError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match read_meta(&path) {
                Ok(meta) => versions.push(meta),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable version directory");
                }
            }
        }
        versions.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(versions)
    }

    /// Load one version directory in full.
    pub fn get(&self, version_id: &str) -> Result<VersionArtifact, EngineError> {
        let dir = self.version_dir(version_id)?;
        if !dir.is_dir() {
            return Err(EngineError::VersionNotFound(version_id.to_string()));
        }

        let meta = read_meta(&dir).map_err(|e| match e {
            EngineError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                EngineError::VersionNotFound(version_id.to_string())
            }
            other => other,
        })?;
        let upgrade_sql = std::fs::read_to_string(dir.join(UPGRADE_FILE)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::InvalidMetadata {
                    version_id: version_id.to_string(),
                    message: format!("{UPGRADE_FILE} is missing"),
                }
            } else {
                EngineError::Io(e)
            }
        })?;
        let downgrade_sql = match std::fs::read_to_string(dir.join(DOWNGRADE_FILE)) {
            Ok(sql) => Some(sql),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(EngineError::Io(e)),
        };

        Ok(VersionArtifact {
            meta,
            upgrade_sql,
            downgrade_sql,
        })
    }

    /// Load and validate the upgrade script of a version: non-empty SQL
    /// whose checksum matches the metadata.
    pub fn load_script(&self, version_id: &str) -> Result<ScriptVersion, EngineError> {
        let artifact = self.get(version_id)?;
        let script = ScriptVersion::new(
            version_id,
            artifact.upgrade_sql,
            &artifact.meta.checksum,
        )?;
        Ok(script)
    }

    /// Resolve a version directory, rejecting ids that would escape the
    /// store root.
    fn version_dir(&self, version_id: &str) -> Result<PathBuf, EngineError> {
        if version_id.is_empty()
            || version_id.contains(['/', '\\'])
            || version_id.contains("..")
        {
            return Err(EngineError::VersionNotFound(version_id.to_string()));
        }
        Ok(self.root.join(version_id))
    }
}

fn read_meta(dir: &Path) -> Result<VersionMeta, EngineError> {
    let raw = std::fs::read_to_string(dir.join(METADATA_FILE))?;
    serde_json::from_str(&raw).map_err(|e| EngineError::InvalidMetadata {
        version_id: dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        message: e.to_string(),
    })
}
