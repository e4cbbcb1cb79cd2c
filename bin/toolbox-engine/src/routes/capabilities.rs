use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/capabilities", get(get_capabilities))
}

/// Every tool id with its binaries and whether they resolve on `PATH` now.
pub async fn get_capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tools": state.engine.capabilities().await }))
}
