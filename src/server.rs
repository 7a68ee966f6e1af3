//! HTTP API.
//!
//! `POST /predict` takes `{"ticker": "AAPL"}` (optionally `"horizon": n`) and
//! answers with a [`TickerForecast`]. The body is read as JSON whatever the
//! `Content-Type`; an empty body counts as `{}`. Failures come back as
//! `{"error": "..."}` with a status chosen by [`ServiceError::status_code`].

use crate::service::{PredictionService, ServiceError, TickerForecast};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<PredictionService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub ticker: Option<String>,

    /// Overrides the configured horizon
    #[serde(default)]
    pub horizon: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "Prediction failed");
        } else {
            warn!(error = %self, "Prediction rejected");
        }
        error_response(status, self.to_string())
    }
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

impl PredictRequest {
    fn from_body(body: &[u8]) -> Result<Self, String> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| {
            if e.is_data() {
                format!("Invalid request body: {e}")
            } else {
                "Request body must be valid JSON".to_string()
            }
        })
    }
}

async fn predict(State(state): State<AppState>, body: Bytes) -> Response {
    let req = match PredictRequest::from_body(&body) {
        Ok(req) => req,
        Err(message) => {
            warn!(error = %message, "Malformed predict request");
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };
    let ticker = req.ticker.unwrap_or_default();
    let horizon = req.horizon;
    let service = Arc::clone(&state.service);

    // History fetch and inference both block.
    let joined = tokio::task::spawn_blocking(move || -> Result<TickerForecast, ServiceError> {
        match horizon {
            Some(h) => service.predict_with_horizon(&ticker, h),
            None => service.predict(&ticker),
        }
    })
    .await;

    match joined {
        Ok(Ok(forecast)) => (StatusCode::OK, Json(forecast)).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "Prediction task aborted");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "prediction task aborted".to_string(),
            )
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn router(service: Arc<PredictionService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { service })
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, service: Arc<PredictionService>) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "stockie v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        listener.local_addr()?
    );

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
