// crates/server/src/routes/crawl.rs
//! Crawl submission endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use ragpipe_jobs::JobType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::tasks::{self, crawl::CrawlParams};

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    /// Listing URL to walk; falls back to the configured default.
    pub base_url: Option<String>,
    pub max_pages: Option<usize>,
}

/// Fire-and-forget acknowledgement: the job id is all a caller gets back.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub ok: bool,
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
}

impl JobAccepted {
    pub fn new(job: &ragpipe_jobs::Job) -> Self {
        Self {
            ok: true,
            job_id: job.id().to_string(),
            job_type: job.job_type(),
        }
    }
}

/// POST /api/crawl — create a crawl job and dispatch it.
async fn start_crawl(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CrawlRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let base_url = request
        .base_url
        .or_else(|| state.config.crawl_base_url.clone())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(
                "no base_url given and RAGPIPE_CRAWL_BASE_URL is unset".to_string(),
            )
        })?;
    let params = CrawlParams {
        base_url,
        max_pages: request.max_pages.unwrap_or(state.config.crawl_max_pages),
    };

    let job = state.store.create(JobType::Crawl);
    crate::metrics::record_job_created(JobType::Crawl, state.store.len());
    tasks::dispatch(
        Arc::clone(&job),
        tasks::crawl::run(
            Arc::clone(&job),
            state.http.clone(),
            state.config.data_dir.clone(),
            params,
        ),
    );

    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job))))
}

/// Build the crawl router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/crawl", post(start_crawl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::routes::api_routes;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn post_json(state: Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = api_routes(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_crawl_without_base_url_is_400() {
        let state = AppState::new(ServerConfig::default());
        let (status, body) = post_json(state.clone(), "/api/crawl", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad request");
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_crawl_returns_job_id_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        });
        // An unreachable base URL: the request still answers immediately and
        // the job fails in the background instead.
        let (status, body) = post_json(
            state.clone(),
            "/api/crawl",
            serde_json::json!({"base_url": "http://127.0.0.1:1/list", "max_pages": 1}),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["ok"], true);
        assert_eq!(body["type"], "crawl");
        let job_id = body["job_id"].as_str().unwrap();
        assert!(state.store.get(job_id).is_some());
    }
}
