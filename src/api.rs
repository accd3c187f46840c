use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::health::HealthChecker,
    config::Config,
    error::SubmitError,
    models::health::HealthStatus,
    queue::{
        orchestrator::{HybridQueue, SubmitRequest},
        store::{Broadcast, JobStore, KvStore},
    },
};

pub struct AppState<S, K, B> {
    pub queue: Arc<HybridQueue<S, K, B>>,
    pub health_checker: HealthChecker,
}

pub async fn run_api_server<S, K, B>(
    config: Config,
    queue: Arc<HybridQueue<S, K, B>>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    let state = Arc::new(AppState {
        queue,
        health_checker: HealthChecker::new(config.clone()),
    });

    let app = Router::new()
        .route("/notifications", post(submit_notification::<S, K, B>))
        .route("/stats", get(queue_stats::<S, K, B>))
        .route(
            "/queues/{queue}/jobs/{id}/replay",
            post(replay_job::<S, K, B>),
        )
        .route("/health", get(health_check::<S, K, B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn submit_notification<S, K, B>(
    State(state): State<Arc<AppState<S, K, B>>>,
    Json(request): Json<SubmitRequest>,
) -> impl IntoResponse
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    match state.queue.submit(request).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))),
        Err(SubmitError::InvalidPayload(reason)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })))
        }
        Err(SubmitError::Unavailable(reason)) => {
            warn!(error = %reason, "Submission rejected, no delivery path available");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": reason })),
            )
        }
    }
}

async fn queue_stats<S, K, B>(State(state): State<Arc<AppState<S, K, B>>>) -> impl IntoResponse
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    match state.queue.stats().await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(e) => {
            warn!(error = %e, "Stats collection failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn replay_job<S, K, B>(
    State(state): State<Arc<AppState<S, K, B>>>,
    Path((queue, id)): Path<(String, String)>,
) -> impl IntoResponse
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    match state.queue.store().replay(&queue, &id).await {
        Ok(true) => {
            info!(queue = %queue, job_id = %id, "Dead-lettered job replayed");
            (StatusCode::OK, Json(json!({ "replayed": true })))
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no dead-lettered job with that id" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn health_check<S, K, B>(State(state): State<Arc<AppState<S, K, B>>>) -> impl IntoResponse
where
    S: JobStore,
    K: KvStore,
    B: Broadcast,
{
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
