//! PostgreSQL access for schemacast.
//!
//! The admin pool talks to the maintenance database (catalog queries,
//! fixture management). Per-tenant work never goes through the pool: each
//! target worker opens a direct connection from its [`target::Target`].

use sqlx::postgres::PgPoolOptions;

pub mod catalog;
pub mod ledger;
pub mod simulator;
pub mod target;

pub type DbPool = sqlx::PgPool;

/// Create the admin connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Verify the admin connection is usable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}
