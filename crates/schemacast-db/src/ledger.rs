//! The per-tenant version ledger.
//!
//! Each tenant database carries a small table recording which versions
//! have been applied to it. Every function here takes `&mut PgConnection`
//! so the calls compose into the script's own transaction: either the
//! script and its stamp commit together, or neither does.

use sqlx::PgConnection;

/// Ledger table name inside each tenant database.
pub const LEDGER_TABLE: &str = "schema_propagation_version";

/// Idempotent ledger creation. `VARCHAR` widths match the generator's
/// version-id and fingerprint formats.
const CREATE_LEDGER_SQL: &str = "\
    CREATE TABLE IF NOT EXISTS schema_propagation_version (\
        version_id VARCHAR(50) PRIMARY KEY,\
        applied_at TIMESTAMPTZ DEFAULT NOW(),\
        checksum VARCHAR(32)\
    )";

/// Result of a ledger lookup for one version id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The version has never been applied to this tenant.
    Absent,
    /// The version is recorded, with the checksum stored at the time
    /// (older rows may predate checksum tracking).
    Present(Option<String>),
}

/// Create the ledger table if it does not exist.
///
/// Two workers racing on first contact can both pass the `IF NOT EXISTS`
/// check and collide on the catalog's unique index; that race reports
/// 42P07 (duplicate table) or 23505 (duplicate key on `pg_type`) and is
/// treated as success.
pub async fn ensure(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    match sqlx::query(CREATE_LEDGER_SQL).execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err))
            if matches!(db_err.code().as_deref(), Some("42P07") | Some("23505")) =>
        {
            Ok(())
        }
        Err(other) => Err(other),
    }
}

/// Look up whether `version_id` has been applied to this tenant.
pub async fn lookup(conn: &mut PgConnection, version_id: &str) -> Result<Applied, sqlx::Error> {
    let row: Option<Option<String>> = sqlx::query_scalar(
        "SELECT checksum FROM schema_propagation_version WHERE version_id = $1",
    )
    .bind(version_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match row {
        None => Applied::Absent,
        Some(checksum) => Applied::Present(checksum),
    })
}

/// Record a successful application. A row already present for this
/// version is left untouched.
pub async fn stamp(
    conn: &mut PgConnection,
    version_id: &str,
    checksum: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO schema_propagation_version (version_id, checksum) \
         VALUES ($1, $2) \
         ON CONFLICT (version_id) DO NOTHING",
    )
    .bind(version_id)
    .bind(checksum)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Record a reapplication: overwrite the stored checksum and timestamp.
/// Used only under the `reapply` checksum-mismatch policy.
pub async fn restamp(
    conn: &mut PgConnection,
    version_id: &str,
    checksum: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO schema_propagation_version (version_id, checksum) \
         VALUES ($1, $2) \
         ON CONFLICT (version_id) \
         DO UPDATE SET checksum = EXCLUDED.checksum, applied_at = NOW()",
    )
    .bind(version_id)
    .bind(checksum)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
