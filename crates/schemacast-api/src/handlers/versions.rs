//! Handlers for generated version artifacts and tenant enumeration.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use schemacast_core::version::VersionMeta;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default tenant pattern when none is supplied.
pub(crate) const DEFAULT_PATTERN: &str = "cmp_%";

#[derive(Debug, Deserialize)]
pub struct DatabasesQuery {
    pub pattern: Option<String>,
}

/// One version directory in full, for the detail endpoint.
#[derive(Debug, Serialize)]
pub struct VersionDetail {
    #[serde(flatten)]
    pub meta: VersionMeta,
    pub upgrade_sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_sql: Option<String>,
}

/// GET /api/v1/schema/versions
///
/// List the metadata of every generated version, newest first.
pub async fn list_versions(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<VersionMeta>>>> {
    let versions = state.engine.list_versions()?;
    Ok(Json(DataResponse { data: versions }))
}

/// GET /api/v1/schema/versions/{id}
///
/// One version's metadata plus its scripts.
pub async fn version_detail(
    State(state): State<AppState>,
    Path(version_id): Path<String>,
) -> AppResult<Json<DataResponse<VersionDetail>>> {
    let artifact = state.engine.version_detail(&version_id)?;
    Ok(Json(DataResponse {
        data: VersionDetail {
            meta: artifact.meta,
            upgrade_sql: artifact.upgrade_sql,
            downgrade_sql: artifact.downgrade_sql,
        },
    }))
}

/// GET /api/v1/schema/databases
///
/// Tenant databases matching the `pattern` query parameter, freshly
/// enumerated from the cluster catalog.
pub async fn list_databases(
    State(state): State<AppState>,
    Query(query): Query<DatabasesQuery>,
) -> AppResult<Json<DataResponse<Vec<String>>>> {
    let pattern = query.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
    let databases = state.engine.list_targets(pattern).await?;
    Ok(Json(DataResponse { data: databases }))
}
