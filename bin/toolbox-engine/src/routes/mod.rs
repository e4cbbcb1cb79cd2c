//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `GET /health` (open)
//! - `POST /api/convert` and `GET /api/capabilities` (pairing required;
//!   conversions are also rate limited)
//! - origin gate, CORS, per-request trace id and security headers on all routes

mod capabilities;
mod convert;
mod health;

use std::sync::Arc;

use axum::Router;
use axum::middleware;

use crate::middleware::{auth, cors, rate_limit, trace, with_security_headers};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let paired = Router::new()
        .merge(convert::router(&state.config).route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_conversions,
        )))
        .merge(capabilities::router())
        // route_layer: unknown paths still 404 instead of 401.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_pairing,
        ));

    let app = Router::new()
        .merge(health::router())
        .merge(paired)
        .layer(middleware::from_fn_with_state(state.clone(), cors::origin_gate))
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(&state))
        .layer(middleware::from_fn(trace::trace_middleware));

    with_security_headers(app).with_state(state)
}
