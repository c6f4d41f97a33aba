//! Handlers for fixture-database management (load testing support).

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default fixture name prefix.
const DEFAULT_PREFIX: &str = "cmp_";

/// How many created names to echo back; the full list can run to five
/// figures.
const ECHO_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct SimulateCreateRequest {
    pub count: usize,
    pub prefix: Option<String>,
    pub start_id: Option<usize>,
    pub template_db: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulateCreateResponse {
    pub created: usize,
    pub databases: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

/// POST /api/v1/schema/simulate/create
///
/// Create a batch of fixture tenant databases.
pub async fn simulate_create(
    State(state): State<AppState>,
    Json(request): Json<SimulateCreateRequest>,
) -> AppResult<Json<DataResponse<SimulateCreateResponse>>> {
    let prefix = request.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
    let created = state
        .engine
        .create_fixtures(
            request.count,
            prefix,
            request.start_id.unwrap_or(1),
            request.template_db.as_deref(),
        )
        .await?;

    let mut databases = created.clone();
    databases.truncate(ECHO_LIMIT);
    Ok(Json(DataResponse {
        data: SimulateCreateResponse {
            created: created.len(),
            databases,
        },
    }))
}

/// DELETE /api/v1/schema/simulate/cleanup
///
/// Drop every fixture database whose name starts with `prefix`.
pub async fn simulate_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> AppResult<Json<DataResponse<CleanupResponse>>> {
    let prefix = query.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
    let removed = state.engine.cleanup_fixtures(prefix).await?;
    Ok(Json(DataResponse {
        data: CleanupResponse { removed },
    }))
}
