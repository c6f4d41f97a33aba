//! Fixture databases for load testing the propagation path.
//!
//! Creates and drops batches of empty (or template-cloned) tenant
//! databases against the admin pool. `CREATE DATABASE` cannot run inside
//! a transaction, so each statement goes through the pool directly.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::DbPool;

/// Ceiling on concurrent admin connections while creating or dropping
/// fixtures; the maintenance database is not the resource under test.
const ADMIN_CONCURRENCY: usize = 20;

/// SQLSTATE for "database already exists".
const DUPLICATE_DATABASE: &str = "42P04";

/// Quote an identifier for interpolation into a DDL statement.
///
/// Database names cannot be bound as parameters in `CREATE DATABASE`.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create `count` fixture databases named `{prefix}{start_id}..`.
///
/// A name that already exists counts as created. Returns the names that
/// exist after the call, in creation order.
pub async fn create_test_databases(
    pool: &DbPool,
    count: usize,
    prefix: &str,
    start_id: usize,
    template: Option<&str>,
) -> Result<Vec<String>, sqlx::Error> {
    let semaphore = Arc::new(Semaphore::new(ADMIN_CONCURRENCY));
    let mut handles = Vec::with_capacity(count);

    for i in 0..count {
        let name = format!("{prefix}{}", start_id + i);
        let sql = match template {
            Some(template) => format!(
                "CREATE DATABASE {} TEMPLATE {}",
                quote_ident(&name),
                quote_ident(template)
            ),
            None => format!("CREATE DATABASE {}", quote_ident(&name)),
        };

        let pool = pool.clone();
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            match sqlx::query(sqlx::AssertSqlSafe(sql)).execute(&pool).await {
                Ok(_) => Some(name),
                Err(sqlx::Error::Database(db_err))
                    if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) =>
                {
                    Some(name)
                }
                Err(e) => {
                    tracing::warn!(database = %name, error = %e, "Fixture creation failed");
                    None
                }
            }
        }));
    }

    let mut created = Vec::with_capacity(count);
    for handle in handles {
        if let Ok(Some(name)) = handle.await {
            created.push(name);
        }
    }
    Ok(created)
}

/// Drop the given fixture databases, terminating any lingering backends
/// first. Returns how many were dropped.
pub async fn cleanup_test_databases(
    pool: &DbPool,
    databases: &[String],
) -> Result<usize, sqlx::Error> {
    let semaphore = Arc::new(Semaphore::new(ADMIN_CONCURRENCY));
    let mut handles = Vec::with_capacity(databases.len());

    for name in databases {
        let name = name.clone();
        let pool = pool.clone();
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");

            let terminate = sqlx::query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
            )
            .bind(&name)
            .execute(&pool)
            .await;
            if let Err(e) = terminate {
                tracing::debug!(database = %name, error = %e, "Backend termination failed");
            }

            let drop_sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&name));
            match sqlx::query(sqlx::AssertSqlSafe(drop_sql))
                .execute(&pool)
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(database = %name, error = %e, "Fixture drop failed");
                    false
                }
            }
        }));
    }

    let mut removed = 0;
    for handle in handles {
        if matches!(handle.await, Ok(true)) {
            removed += 1;
        }
    }
    Ok(removed)
}
