//! Engine configuration, loaded from environment variables at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use toolbox_core::{EngineSettings, PairingKey, UploadLimits};

const MIB: u64 = 1024 * 1024;
const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Runtime configuration for toolbox-engine.
///
/// Every field has a default so a bare `toolbox-engine` works for local
/// development against `http://localhost:3000`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Loopback address to bind (default: `127.0.0.1:34781`).
    pub bind_address: String,
    /// Permit a non-loopback bind address (`TOOLBOX_ALLOW_REMOTE=1`).
    pub allow_remote: bool,

    pub max_files: usize,
    pub max_file_bytes: u64,
    /// Summed upload cap for `powerpoint-to-pdf`.
    pub pptx_max_bytes: u64,
    pub timeout: Duration,
    pub max_concurrent: usize,

    /// Browser origins allowed to call the engine.
    pub allowed_origins: Vec<String>,
    /// Wildcard entries dropped from `TOOLBOX_ORIGINS`; logged at startup.
    pub ignored_origins: Vec<String>,

    /// Explicit pairing key; wins over the persisted file. `Debug` is redacted.
    pub pairing_key: Option<PairingKey>,
    pub pairing_file: PathBuf,

    /// Reject HTML → PDF targets on loopback/private networks.
    pub hardened: bool,
    /// Global `/api/convert` budget per minute.
    pub rate_limit_per_minute: u32,
    pub temp_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,
    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        let (ignored_origins, allowed_origins) =
            split_origins(&env.or("TOOLBOX_ORIGINS", DEFAULT_ORIGIN));
        Self {
            bind_address: env.or("TOOLBOX_BIND", "127.0.0.1:34781"),
            allow_remote: env.flag("TOOLBOX_ALLOW_REMOTE", false),
            max_files: env.parse("TOOLBOX_MAX_FILES", 20usize).max(1),
            max_file_bytes: env.parse("TOOLBOX_MAX_FILE_BYTES", 1024 * MIB).max(1),
            pptx_max_bytes: env.parse("TOOLBOX_PPTX_MAX_BYTES", 200 * MIB).max(1),
            timeout: Duration::from_millis(env.parse("TOOLBOX_TIMEOUT_MS", 120_000u64).max(1)),
            max_concurrent: env.parse("TOOLBOX_MAX_CONCURRENT", 2usize).max(1),
            allowed_origins,
            ignored_origins,
            pairing_key: env
                .get("TOOLBOX_PAIRING_KEY")
                .filter(|s| !s.trim().is_empty())
                .map(PairingKey::from_secret),
            pairing_file: env
                .get("TOOLBOX_PAIRING_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_pairing_file),
            hardened: env.flag("TOOLBOX_HARDENED", true),
            rate_limit_per_minute: env.parse("TOOLBOX_RATE_LIMIT_PER_MINUTE", 20u32).max(1),
            temp_dir: env
                .get("TOOLBOX_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            log_level: env.or("TOOLBOX_LOG", "info"),
            log_json: env.flag("TOOLBOX_LOG_JSON", false),
        }
    }

    /// Parse the bind address and refuse non-loopback interfaces unless
    /// explicitly allowed.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr: SocketAddr = self.bind_address.parse()?;
        if !addr.ip().is_loopback() && !self.allow_remote {
            anyhow::bail!(
                "refusing to bind {addr}: the engine is loopback-only (set TOOLBOX_ALLOW_REMOTE=1 to override)"
            );
        }
        Ok(addr)
    }

    /// Largest request body worth reading: every file at full size plus
    /// room for multipart framing and the small fields.
    pub fn body_limit(&self) -> usize {
        let files = self.max_file_bytes.saturating_mul(self.max_files as u64);
        usize::try_from(files.saturating_add(MIB)).unwrap_or(usize::MAX)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            temp_root: self.temp_dir.clone(),
            timeout: self.timeout,
            limits: UploadLimits {
                max_files: self.max_files,
                max_file_bytes: self.max_file_bytes,
            },
            pptx_max_bytes: self.pptx_max_bytes,
            max_concurrent: self.max_concurrent,
            hardened: self.hardened,
        }
    }
}

/// `<config dir>/toolbox-engine/pairing.key`, else `~/.toolbox-engine/pairing.key`.
fn default_pairing_file() -> PathBuf {
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join("toolbox-engine").join("pairing.key");
    }
    dirs_next::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".toolbox-engine")
        .join("pairing.key")
}

// ── private helpers ──────────────────────────────────────────────────────────

/// Comma-separated origins, trimmed and without a trailing `/`. Entries with
/// a `*` cannot be matched exactly and are returned separately.
fn split_origins(raw: &str) -> (Vec<String>, Vec<String>) {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_owned())
        .filter(|s| !s.is_empty())
        .partition(|s| s.contains('*'))
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
            None => default,
        }
    }
}
