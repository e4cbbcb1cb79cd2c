use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::Response;
use toolbox_core::EngineError;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use super::auth::PAIRING_HEADER;
use super::trace::X_TRACE_ID;
use crate::error::ServerError;
use crate::state::AppState;

pub static ADVISORY_HEADER: &str = "x-toolbox-advisory";
pub static JOB_ID_HEADER: &str = "x-toolbox-job-id";

/// Preflights from allowlisted origins are answered here and cached for a day.
pub fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(PAIRING_HEADER)])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(ADVISORY_HEADER),
            HeaderName::from_static(JOB_ID_HEADER),
            HeaderName::from_static(X_TRACE_ID),
        ])
        .max_age(Duration::from_secs(86_400))
}

/// Reject browser requests from origins outside the allowlist.
///
/// Requests without an `Origin` header (curl, native clients) pass; the
/// pairing gate still applies to them.
pub async fn origin_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(origin) = req.headers().get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !state.config.allowed_origins.iter().any(|o| o == origin) {
            warn!(origin, path = %req.uri().path(), "origin rejected");
            return Err(EngineError::OriginRejected(origin.to_owned()).into());
        }
    }
    Ok(next.run(req).await)
}
