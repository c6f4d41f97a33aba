//! Tenant enumeration against the cluster catalog.
//!
//! One query per job; the engine never caches the list beyond that.

use schemacast_core::pattern::to_like_pattern;

use crate::target::{ConnectSettings, Target};
use crate::DbPool;

/// List tenant database names matching a glob-like pattern (`cmp_*`).
pub async fn list_databases(pool: &DbPool, pattern: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT datname FROM pg_database \
         WHERE datname LIKE $1 AND datistemplate = false \
         ORDER BY datname",
    )
    .bind(to_like_pattern(pattern))
    .fetch_all(pool)
    .await
}

/// Materialize the target list for a job: every matching tenant with the
/// job's resolved connection settings attached.
pub async fn resolve_targets(
    pool: &DbPool,
    pattern: &str,
    settings: &ConnectSettings,
) -> Result<Vec<Target>, sqlx::Error> {
    let names = list_databases(pool, pattern).await?;
    Ok(names
        .into_iter()
        .map(|name| Target::new(settings, name))
        .collect())
}
