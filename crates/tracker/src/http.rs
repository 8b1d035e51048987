//! HTTP surface exposed to consumers.

use std::future::Future;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::{Error, ErrorBody, PositionReport};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::CoordinatorStats;
use crate::service::PositionService;

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    has_sample: bool,
    max_age_ms: u64,
    stats: CoordinatorStats,
}

/// Build the router: `GET /position` and `GET /health`.
pub fn router(service: PositionService) -> Router {
    Router::new()
        .route("/position", get(position))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, service: PositionService, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving positions on http://{}/position", addr);
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Server(e.to_string()))
}

async fn position(State(service): State<PositionService>) -> Response {
    match service.current_position().await {
        Ok(cached) => Json(PositionReport::from_sample(&cached.sample, cached.stale)).into_response(),
        Err(unavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: unavailable.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn health(State(service): State<PositionService>) -> Json<HealthBody> {
    let coordinator = service.coordinator();
    Json(HealthBody {
        status: "ok",
        has_sample: coordinator.peek().is_some(),
        max_age_ms: service.max_age().as_millis() as u64,
        stats: coordinator.stats(),
    })
}
