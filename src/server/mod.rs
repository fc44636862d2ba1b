mod routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::analysis::TradeActivityAnalyzer;
use crate::api::BinanceClient;
use crate::db::CoinStore;
use crate::error::MonitorError;
use crate::monitor::PriceMonitor;

/// Shared state behind every handler.
pub struct AppState {
    pub store: Arc<CoinStore>,
    pub feed: BinanceClient,
    pub monitor: Arc<PriceMonitor>,
    pub analyzer: TradeActivityAnalyzer,
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_router())
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::AlreadyTracked(_) => StatusCode::CONFLICT,
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::Feed(_) | MonitorError::FeedData(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Db(_) | MonitorError::Migrate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
