use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use toolbox_core::EngineError;
use tracing::warn;

use crate::error::ServerError;
use crate::state::AppState;

pub static PAIRING_HEADER: &str = "x-toolbox-pairing-key";

/// Pairing gate. Runs before the body is read, so a rejected request never
/// reaches the multipart parser or the disk.
pub async fn require_pairing(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let presented = req
        .headers()
        .get(PAIRING_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented.is_empty() || !state.pairing.verify(presented) {
        warn!(
            path = %req.uri().path(),
            presented = !presented.is_empty(),
            "pairing key rejected"
        );
        return Err(EngineError::Unauthorized.into());
    }
    Ok(next.run(req).await)
}
