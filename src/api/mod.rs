//! HTTP boundary: checkout-facing hold routes and the admin surface.

mod admin;
mod error;
mod holds;

pub use error::{ApiError, ApiResult};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;

use crate::engine::{Engine, EngineError};
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL, HTTP_TIMEOUTS_TOTAL};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>, request_timeout: Duration) -> Router {
    Router::new()
        .merge(holds::routes())
        .merge(admin::routes())
        .route_layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn_with_state(request_timeout, enforce_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Run one engine transaction on its own task. If the request is dropped or
/// times out, the transaction and any compensation still run to completion.
pub(crate) async fn transaction<T, F, Fut>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(Arc<Engine>) -> Fut,
    Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(f(state.engine.clone()))
        .await
        .map_err(|e| ApiError::Internal(format!("transaction task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |p| p.as_str().to_owned());
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "method" => method, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!("request to {path} exceeded {}ms", limit.as_millis());
            metrics::counter!(HTTP_TIMEOUTS_TOTAL).increment(1);
            ApiError::Timeout.into_response()
        }
    }
}
