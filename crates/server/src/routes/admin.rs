// crates/server/src/routes/admin.rs
//! Maintenance endpoints: reindex, backup, restore.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use ragpipe_jobs::JobType;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::routes::crawl::JobAccepted;
use crate::state::AppState;
use crate::tasks::{self, maintenance};

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub backup_id: String,
}

/// POST /api/admin/reindex — rebuild the chunk index as a background job.
async fn start_reindex(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<JobAccepted>) {
    let job = state.store.create(JobType::Reindex);
    crate::metrics::record_job_created(JobType::Reindex, state.store.len());
    tasks::dispatch(
        Arc::clone(&job),
        maintenance::reindex(Arc::clone(&job), state.config.data_dir.clone()),
    );
    (StatusCode::ACCEPTED, Json(JobAccepted::new(&job)))
}

/// POST /api/admin/backup — copy the data directory aside as a background job.
async fn start_backup(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<JobAccepted>) {
    let job = state.store.create(JobType::Backup);
    crate::metrics::record_job_created(JobType::Backup, state.store.len());
    tasks::dispatch(
        Arc::clone(&job),
        maintenance::backup(
            Arc::clone(&job),
            state.config.data_dir.clone(),
            state.config.backup_dir.clone(),
        ),
    );
    (StatusCode::ACCEPTED, Json(JobAccepted::new(&job)))
}

/// POST /api/admin/restore — bring a named backup back as a background job.
async fn start_restore(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    if request.backup_id.is_empty() {
        return Err(ApiError::BadRequest("backup_id is required".to_string()));
    }

    let job = state.store.create(JobType::Restore);
    crate::metrics::record_job_created(JobType::Restore, state.store.len());
    tasks::dispatch(
        Arc::clone(&job),
        maintenance::restore(
            Arc::clone(&job),
            state.config.data_dir.clone(),
            state.config.backup_dir.clone(),
            request.backup_id,
        ),
    );
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job))))
}

/// Build the admin router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/reindex", post(start_reindex))
        .route("/admin/backup", post(start_backup))
        .route("/admin/restore", post(start_restore))
}
