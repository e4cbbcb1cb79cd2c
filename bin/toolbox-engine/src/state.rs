//! Shared application state injected into every Axum handler.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use toolbox_core::{Engine, PairingKey};

use crate::config::Config;

/// Process-wide limiter for `/api/convert`.
pub type ConvertLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Job pipeline; owns the admission controller.
    pub engine: Arc<Engine>,
    /// Resolved once at startup, read-only afterwards.
    pub pairing: PairingKey,
    pub limiter: Arc<ConvertLimiter>,
}

impl AppState {
    pub fn new(config: Config, engine: Engine, pairing: PairingKey) -> Self {
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            config: Arc::new(config),
            engine: Arc::new(engine),
            pairing,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("pairing", &self.pairing)
            .finish_non_exhaustive()
    }
}
