//! Route definitions for the `/schema` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{propagation, simulate, versions};
use crate::state::AppState;

/// Routes mounted at `/schema`.
///
/// ```text
/// GET    /versions                  -> list_versions
/// GET    /versions/{id}             -> version_detail
/// GET    /databases                 -> list_databases
/// GET    /metrics                   -> metrics
/// GET    /propagate                 -> list_jobs
/// POST   /propagate                 -> start_propagation
/// GET    /propagate/{job_id}        -> job_snapshot
/// GET    /propagate/{job_id}/stream -> stream_progress (SSE)
/// POST   /propagate/{job_id}/stop   -> stop_propagation
/// POST   /simulate/create           -> simulate_create
/// DELETE /simulate/cleanup          -> simulate_cleanup
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/versions", get(versions::list_versions))
        .route("/versions/{id}", get(versions::version_detail))
        .route("/databases", get(versions::list_databases))
        .route("/metrics", get(propagation::metrics))
        .route(
            "/propagate",
            get(propagation::list_jobs).post(propagation::start_propagation),
        )
        .route("/propagate/{job_id}", get(propagation::job_snapshot))
        .route(
            "/propagate/{job_id}/stream",
            get(propagation::stream_progress),
        )
        .route(
            "/propagate/{job_id}/stop",
            post(propagation::stop_propagation),
        )
        .route("/simulate/create", post(simulate::simulate_create))
        .route("/simulate/cleanup", delete(simulate::simulate_cleanup))
}
