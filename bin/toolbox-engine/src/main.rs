//! toolbox-engine – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON or pretty).
//! 3. Resolve the pairing key (override, persisted file, or freshly generated).
//! 4. Build the conversion engine and the Axum router.
//! 5. Serve on the loopback address until SIGINT/SIGTERM.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use toolbox_core::{Engine, PairingKey, PairingSource};
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "toolbox-engine", version)]
#[command(about = "Local document conversion engine (LibreOffice, Ghostscript, qpdf, Chromium)")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP engine (default).
    Serve,
    /// Print the pairing key to paste into the browser, creating it if needed.
    PairingKey {
        /// Discard the persisted key and generate a new one.
        #[arg(long)]
        rotate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::PairingKey { rotate } => print_pairing_key(&cfg, rotate),
    }
}

fn init_tracing(cfg: &Config) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: TOOLBOX_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    // Logs go to stderr so `pairing-key` output stays clean on stdout.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn print_pairing_key(cfg: &Config, rotate: bool) -> anyhow::Result<()> {
    if let Some(key) = &cfg.pairing_key {
        if rotate {
            warn!("TOOLBOX_PAIRING_KEY is set; unset it to use a rotated key");
        }
        println!("{}", key.expose());
        return Ok(());
    }

    let key = if rotate {
        let key = PairingKey::rotate(&cfg.pairing_file)
            .with_context(|| format!("rotating {}", cfg.pairing_file.display()))?;
        info!(path = %cfg.pairing_file.display(), "pairing key rotated; re-pair open browser tabs");
        key
    } else {
        PairingKey::load_or_create(&cfg.pairing_file)
            .with_context(|| format!("reading {}", cfg.pairing_file.display()))?
            .0
    };
    println!("{}", key.expose());
    Ok(())
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "toolbox-engine starting");
    let addr = cfg.socket_addr()?;
    if !cfg.ignored_origins.is_empty() {
        warn!(
            ignored = ?cfg.ignored_origins,
            allowed = ?cfg.allowed_origins,
            "wildcard entries in TOOLBOX_ORIGINS are ignored; list each browser origin explicitly"
        );
    }

    // ── 3. Pairing key ─────────────────────────────────────────────────────────
    let (pairing, source) = PairingKey::resolve(
        cfg.pairing_key.as_ref().map(PairingKey::expose),
        &cfg.pairing_file,
    )
    .with_context(|| format!("loading pairing key from {}", cfg.pairing_file.display()))?;
    match source {
        PairingSource::Environment => info!("pairing key taken from TOOLBOX_PAIRING_KEY"),
        PairingSource::File | PairingSource::Generated => info!(
            path = %cfg.pairing_file.display(),
            ?source,
            "pairing key ready; run `toolbox-engine pairing-key` to print it"
        ),
    }

    // ── 4. Engine + router ─────────────────────────────────────────────────────
    std::fs::create_dir_all(&cfg.temp_dir)
        .with_context(|| format!("creating temp dir {}", cfg.temp_dir.display()))?;
    let engine = Engine::new(cfg.engine_settings());
    info!(
        max_concurrent = cfg.max_concurrent,
        max_files = cfg.max_files,
        timeout_ms = cfg.timeout.as_millis() as u64,
        hardened = cfg.hardened,
        origins = ?cfg.allowed_origins,
        "conversion engine ready"
    );

    let state = Arc::new(AppState::new(cfg, engine, pairing));
    let app = routes::build(state);

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("toolbox-engine stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; finishing in-flight jobs");
}
