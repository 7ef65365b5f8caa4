// crates/server/src/routes/pipeline.rs
//! Preprocess/embed pipeline endpoint.

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
use crate::tasks::{self, pipeline::PipelineParams};

#[derive(Debug, Deserialize)]
pub struct PipelineRequest {
    pub task: String,
    #[serde(flatten)]
    pub params: PipelineParams,
}

/// POST /api/pipeline/run — run a named pipeline as a background job.
///
/// `preprocess_embed` is the only pipeline; anything else is a 400.
async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PipelineRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    if request.task != "preprocess_embed" {
        return Err(ApiError::BadRequest(format!(
            "unsupported task: {}",
            request.task
        )));
    }

    let job = state.store.create(JobType::PreprocessEmbed);
    crate::metrics::record_job_created(JobType::PreprocessEmbed, state.store.len());
    tasks::dispatch(
        Arc::clone(&job),
        tasks::pipeline::run(
            Arc::clone(&job),
            state.config.data_dir.clone(),
            request.params,
        ),
    );

    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job))))
}

/// Build the pipeline router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/pipeline/run", post(run_pipeline))
}
