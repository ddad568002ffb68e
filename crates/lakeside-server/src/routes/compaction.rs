//! Compaction service routes.
//!
//! | Method | Path            | Purpose                    |
//! |--------|-----------------|----------------------------|
//! | POST   | `/`             | Run one compaction         |
//! | GET    | `/`             | Coordinator status         |
//! | GET    | `/transactions` | Full log, ordered          |
//! | GET    | `/reconcile`    | Orphan report              |
//! | DELETE | `/cleanup`      | Delete orphans             |
//! | GET    | `/health`       | Liveness                   |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use lakeside_lake::{CompactionOutcome, TransactionEntry};

use crate::error::ApiResult;
use crate::server::AppState;

/// Builds the compaction service route table.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(run_compaction).get(status))
        .route("/transactions", get(transactions))
        .route("/reconcile", get(reconcile))
        .route("/cleanup", delete(cleanup))
        .route("/health", get(super::health))
}

/// POST `/` — runs one compaction.
///
/// Returns the committed summary, the literal `No files to compact` when
/// the staging area holds nothing, 409 when the coordinator is held, and
/// 500 for other pre-commit failures.
async fn run_compaction(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let outcome = state.compactor.run().await?;
    Ok(match outcome {
        CompactionOutcome::NoFiles => (StatusCode::OK, "No files to compact").into_response(),
        CompactionOutcome::Compacted(summary) => Json(summary).into_response(),
    })
}

/// GET `/` — coordinator status snapshot.
async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let status = state.coordinator.status().await?;
    Ok(Json(status).into_response())
}

/// GET `/transactions` — the full log in version order.
async fn transactions(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TransactionEntry>>> {
    let read = state.compactor.log().read_all().await?;
    if !read.missing_versions.is_empty() {
        tracing::warn!(missing = ?read.missing_versions, "serving log with version gaps");
    }
    Ok(Json(read.entries))
}

/// GET `/reconcile` — orphan report.
async fn reconcile(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let report = state.reconciler.reconcile().await?;
    Ok(Json(report).into_response())
}

/// DELETE `/cleanup` — deletes orphans.
async fn cleanup(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let report = state.reconciler.cleanup().await?;
    Ok(Json(report).into_response())
}
