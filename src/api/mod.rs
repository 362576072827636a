use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/readings", post(handlers::post_readings))
        .route("/api/quotes", get(handlers::get_quotes))
        .route("/api/predict", post(handlers::post_predict))
        .route("/api/model/retrain", post(handlers::post_retrain))
        .with_state(state)
}
