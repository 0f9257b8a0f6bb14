//! Control-plane HTTP API (§6, §6.1): `POST /runs`, `DELETE /runs/{id}`,
//! `GET /runs/{id}/report`, `GET /runs/{id}/stream`.
//!
//! The teacher's own HTTP surface (`metrics.rs::start_metrics_server`) is
//! a raw-hyper Prometheus `/metrics` endpoint with no routing to speak
//! of; it has nothing to generalize from for a multi-route JSON API with
//! path params and a streaming response, so this module is grounded
//! instead in the `axum` `Router`/`State`/`IntoResponse` idiom used
//! elsewhere in the example pack's service crates — state wrapped in one
//! `Clone` struct, one handler per route, errors converted to responses
//! via a single `IntoResponse` impl rather than per-handler status-code
//! plumbing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt as _};
use tracing::{error, info};

use crate::run_manager::{FinalReport, RunConfig, RunError, RunManager, RunStatus};

#[derive(Clone)]
struct AppState {
    runs: Arc<RunManager>,
}

/// Builds the control-plane router. Mounted on its own port, separate
/// from the teacher's Prometheus `/metrics` server (`metrics.rs`).
pub fn router(run_manager: Arc<RunManager>) -> Router {
    Router::new()
        .route("/runs", post(create_run))
        .route("/runs/:id", delete(stop_run))
        .route("/runs/:id/report", get(get_report))
        .route("/runs/:id/stream", get(stream_run))
        .with_state(AppState { runs: run_manager })
}

/// Binds and serves the control-plane API until the process exits.
pub async fn serve(addr: SocketAddr, run_manager: Arc<RunManager>) -> std::io::Result<()> {
    let app = router(run_manager);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control-plane API listening");
    axum::serve(listener, app).await
}

impl IntoResponse for RunError {
    fn into_response(self) -> Response {
        let status = match &self {
            RunError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            RunError::ClientBuildFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RunError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        error!(error = %self, "control-plane request failed");
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct CreateRunResponse {
    run_id: String,
    status: RunStatus,
}

async fn create_run(
    State(state): State<AppState>,
    Json(config): Json<RunConfig>,
) -> Result<(StatusCode, Json<CreateRunResponse>), RunError> {
    let run_id = state.runs.start(config)?;
    let status = state.runs.status(&run_id)?;
    Ok((StatusCode::CREATED, Json(CreateRunResponse { run_id, status })))
}

#[derive(Serialize)]
struct StopResponse {
    run_id: String,
    accepted: bool,
}

async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<(StatusCode, Json<StopResponse>), RunError> {
    state.runs.stop(&run_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StopResponse {
            run_id,
            accepted: true,
        }),
    ))
}

async fn get_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<FinalReport>, RunError> {
    Ok(Json(state.runs.report(&run_id)?))
}

async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, RunError> {
    let receiver = state.runs.subscribe(&run_id)?;
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(e) => {
                error!(error = %e, "failed to encode stream event as json");
                None
            }
        },
        // Subscriber lagged behind the broadcast channel's buffer;
        // skip the gap rather than terminate the stream.
        Err(_) => None,
    });

    Ok(Sse::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config_manager = Arc::new(ConfigManager::bootstrap_from_env().unwrap());
        router(Arc::new(RunManager::new(config_manager)))
    }

    #[tokio::test]
    async fn report_for_unknown_run_is_404() {
        let app = test_router();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/runs/does-not-exist/report")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_run_rejects_invalid_url() {
        let app = test_router();
        let body = serde_json::json!({"target_url": "not-a-url", "mode": "iterations", "iterations": 1});
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_run_accepts_valid_config() {
        let app = test_router();
        let body = serde_json::json!({
            "target_url": "http://127.0.0.1:1/unreachable",
            "mode": "iterations",
            "iterations": 1,
            "workers": 1,
        });
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/runs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn stop_unknown_run_is_404() {
        let app = test_router();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("DELETE")
                    .uri("/runs/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
