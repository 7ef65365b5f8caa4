// crates/server/src/routes/jobs.rs
//! Job inspection endpoints.
//!
//! - `GET /jobs`             — recent job snapshots (dashboard surface)
//! - `GET /jobs/stats`       — store-level stats
//! - `GET /jobs/{id}`        — one job summary, `?include_events=true` embeds the log
//! - `GET /jobs/{id}/events` — live SSE stream, `?since=` resume watermark

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use ragpipe_jobs::{JobEvent, JobSnapshot, StoreStats};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Client auto-reconnect backoff hint, milliseconds.
const RETRY_MS: u64 = 3000;
/// Live tail poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Heartbeat cadence, in poll ticks (30 × 500 ms ≈ 15 s).
const PING_EVERY_TICKS: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub include_events: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct JobSummaryResponse {
    pub ok: bool,
    pub job: JobSnapshot,
}

/// GET /api/jobs — most recent jobs first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<JobSnapshot>> {
    let limit = query.limit.unwrap_or(20);
    let mut snapshots: Vec<JobSnapshot> = state
        .store
        .jobs()
        .iter()
        .map(|job| job.snapshot())
        .collect();
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    snapshots.truncate(limit);
    Json(snapshots)
}

/// GET /api/jobs/stats — store totals and per-status counts.
async fn job_stats(State(state): State<Arc<AppState>>) -> Json<StoreStats> {
    Json(state.store.stats())
}

/// GET /api/jobs/{id} — structured snapshot of one job.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<JobSummaryResponse>> {
    let job = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::JobNotFound(id.clone()))?;
    let job = if query.include_events.unwrap_or(false) {
        job.snapshot_with_events()
    } else {
        job.snapshot()
    };
    Ok(Json(JobSummaryResponse { ok: true, job }))
}

/// GET /api/jobs/{id}/events — the live event stream.
///
/// On open: a `retry` hint plus keep-alive comment blocks, then either one
/// `snapshot` frame (`since` absent or 0) or a replay of events past the
/// watermark (`since` > 0). An unknown id is answered in-band with a single
/// `error` frame; this channel never uses HTTP error statuses.
///
/// The tail loop polls every 500 ms, forwarding new events in order. A
/// terminal status ends the stream with one `done` frame; while the job is
/// active, a `ping` frame goes out every 30 ticks. Client disconnect drops
/// the generator at its next yield or sleep, which is the cancellation path.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let since = query.since.unwrap_or(0);
    let job = state.store.get(&id);

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().retry(Duration::from_millis(RETRY_MS)));
        yield Ok(Event::default().comment("cache-control: no-cache"));
        yield Ok(Event::default().comment("connection: keep-alive"));

        let Some(job) = job else {
            yield Ok(Event::default().event("error").data(r#"{"error":"not_found"}"#));
            return;
        };

        let mut watermark = since;
        if since > 0 {
            // Reconnect: replay what survives in the ring buffer, no snapshot.
            for event in job.get_events_since(since) {
                watermark = event.event_id;
                yield Ok(event_frame(&event));
            }
        } else {
            let snapshot = serde_json::json!({"job": job.snapshot()});
            yield Ok(Event::default().event("snapshot").data(snapshot.to_string()));
        }

        let mut ticks: u32 = 0;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            ticks += 1;

            // Status is read before draining so that events pushed ahead of
            // the terminal flip are delivered before the final `done` frame.
            let status = job.status();
            for event in job.get_events_since(watermark) {
                watermark = event.event_id;
                yield Ok(event_frame(&event));
            }

            if status.is_terminal() {
                let done = serde_json::json!({
                    "job": {"status": status, "results": job.snapshot().results}
                });
                yield Ok(Event::default().event("done").data(done.to_string()));
                break;
            }

            if ticks % PING_EVERY_TICKS == 0 {
                let ping = serde_json::json!({"timestamp": Utc::now().timestamp()});
                yield Ok(Event::default().event("ping").data(ping.to_string()));
            }
        }
    };

    (
        [
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(stream),
    )
}

fn event_frame(event: &JobEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/events", get(stream_job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::routes::api_routes;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use ragpipe_jobs::EventKind;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        AppState::new(ServerConfig::default())
    }

    async fn get_response(state: Arc<AppState>, uri: &str) -> axum::response::Response {
        api_routes(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn get_body(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let response = get_response(state, uri).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_get_job_summary() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Crawl);
        job.push(EventKind::Info, "started", Value::Null);

        let (status, body) = get_body(state.clone(), &format!("/api/jobs/{}", job.id())).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["job"]["id"], job.id());
        assert_eq!(json["job"]["type"], "crawl");
        assert!(json["job"].get("events").is_none());

        let (_, body) = get_body(
            state,
            &format!("/api/jobs/{}?include_events=true", job.id()),
        )
        .await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["job"]["events"][0]["message"], "started");
    }

    #[tokio::test]
    async fn test_get_job_unknown_id_is_404() {
        let (status, body) = get_body(test_state(), "/api/jobs/000000000000").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Job not found");
    }

    #[tokio::test]
    async fn test_job_stats_shape() {
        let state = test_state();
        state.store.create(ragpipe_jobs::JobType::Crawl).succeed();
        let (status, body) = get_body(state, "/api/jobs/stats").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["total_jobs"], 1);
        assert_eq!(json["status_counts"]["succeeded"], 1);
        assert_eq!(json["max_jobs"], 200);
        assert_eq!(json["ttl_hours"], 24);
    }

    #[tokio::test]
    async fn test_list_jobs_recent_first_with_limit() {
        let state = test_state();
        let first = state.store.create(ragpipe_jobs::JobType::Crawl);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = state.store.create(ragpipe_jobs::JobType::Backup);

        let (_, body) = get_body(state.clone(), "/api/jobs").await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["id"], second.id());
        assert_eq!(json[1]["id"], first.id());

        let (_, body) = get_body(state, "/api/jobs?limit=1").await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], second.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_unknown_job_yields_single_error_frame() {
        let response = get_response(test_state(), "/api/jobs/ffffffffffff/events").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.contains("text/event-stream"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body.matches("event: error").count(), 1);
        assert!(body.contains(r#"{"error":"not_found"}"#));
        assert!(!body.contains("event: snapshot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_headers() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Crawl);
        job.succeed();

        let response =
            get_response(state, &format!("/api/jobs/{}/events", job.id())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers["content-type"]
            .to_str()
            .unwrap()
            .contains("text/event-stream"));
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["connection"], "keep-alive");
        assert_eq!(headers["access-control-allow-origin"], "*");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_fresh_connection_gets_snapshot_first() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Reindex);
        job.succeed();

        let (_, body) = get_body(state, &format!("/api/jobs/{}/events", job.id())).await;
        assert!(body.contains("retry:"));
        assert_eq!(body.matches("event: snapshot").count(), 1);
        assert!(!body.contains("event: error"));
        // Snapshot precedes the closing done frame.
        let snapshot_at = body.find("event: snapshot").unwrap();
        let done_at = body.find("event: done").unwrap();
        assert!(snapshot_at < done_at);
        assert!(body.contains(r#""status":"succeeded""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_replays_events_after_watermark() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Crawl);
        for i in 1..=5 {
            job.push(EventKind::Info, format!("event {i}"), Value::Null);
        }
        job.succeed();

        let (_, body) = get_body(
            state,
            &format!("/api/jobs/{}/events?since=2", job.id()),
        )
        .await;

        assert!(!body.contains("event: snapshot"));
        assert!(!body.contains(r#""event_id":1,"#));
        assert!(!body.contains(r#""event_id":2,"#));
        for id in 3..=5 {
            assert!(body.contains(&format!(r#""event_id":{id},"#)), "missing event {id}");
        }
        assert_eq!(body.matches("event: done").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_delivers_events_in_order_then_done() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Crawl);
        let pusher = {
            let job = job.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                job.mark_running();
                job.push(EventKind::Info, "crawl started", Value::Null);
                tokio::time::sleep(Duration::from_millis(100)).await;
                job.push(EventKind::Progress, "page 1", json!({"page": 1}));
                tokio::time::sleep(Duration::from_millis(100)).await;
                job.push(EventKind::Done, "crawl finished", Value::Null);
                job.succeed();
            })
        };

        let (_, body) = get_body(state, &format!("/api/jobs/{}/events", job.id())).await;
        pusher.await.unwrap();

        let mut positions: Vec<usize> = [
            "event: snapshot",
            "event: info",
            "event: progress",
            "data: {\"event_id\":3",
        ]
        .iter()
        .map(|needle| body.find(needle).unwrap_or_else(|| panic!("missing {needle:?}")))
        .collect();
        // The closing frame is the last `event: done` (event C is one too).
        positions.push(body.rfind("event: done").unwrap());
        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1], "out of order frames in: {body}");
        }
        assert!(body.contains(r#""status":"succeeded""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_pings_while_idle() {
        let state = test_state();
        let job = state.store.create(ragpipe_jobs::JobType::Crawl);
        job.mark_running();

        let response = get_response(state, &format!("/api/jobs/{}/events", job.id())).await;
        let mut chunks = response.into_body().into_data_stream();

        let mut collected = String::new();
        while !collected.contains("event: ping") {
            let chunk = chunks
                .next()
                .await
                .expect("stream ended before a ping")
                .unwrap();
            collected.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(collected.contains("\"timestamp\""));
        // Dropping `chunks` here is the client disconnect; the generator is
        // cancelled at its next yield or sleep.
    }
}
