use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::ServerError;
use crate::state::AppState;

/// Global requests-per-minute budget for conversions.
pub async fn limit_conversions(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if state.limiter.check().is_err() {
        warn!(path = %req.uri().path(), "conversion rate limit exceeded");
        return Err(ServerError::RateLimited);
    }
    Ok(next.run(req).await)
}
