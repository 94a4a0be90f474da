use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use optohub::api::{metrics::init_metrics, rate_limit::spawn_cleanup_task};
use optohub::auth::SessionStore;
use optohub::config::Config;
use optohub::notifications::mailer_from_config;
use optohub::AppState;

const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
const SESSION_PURGE_SECS: u64 = 600;

#[derive(Parser, Debug)]
#[command(name = "optohub")]
#[command(author, version, about = "Community site for optometry professionals", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "optohub.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OptoHub v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db = optohub::db::init(&config.server.data_dir).await?;

    let mailer = mailer_from_config(&config.email);
    if !mailer.delivers() {
        tracing::warn!("SMTP is not configured; outgoing email will only be logged");
    }

    let mut state = AppState::new(config.clone(), db, mailer);
    match init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => tracing::warn!("Metrics disabled: {}", e),
    }
    let state = Arc::new(state);

    let purged = state.sessions.purge_expired(Utc::now()).await?;
    if purged > 0 {
        tracing::info!(purged, "Removed expired sessions");
    }

    if let (Some(email), Some(password)) = (
        config.auth.admin_email.as_deref(),
        config.auth.admin_password.as_deref(),
    ) {
        state.auth.ensure_admin_user(email, password).await?;
    }

    spawn_cleanup_task(state.rate_limiter.clone(), RATE_LIMIT_CLEANUP_SECS);
    spawn_session_purge(state.sessions.clone(), SESSION_PURGE_SECS);

    let app = optohub::api::create_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn spawn_session_purge(sessions: SessionStore, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            match sessions.purge_expired(Utc::now()).await {
                Ok(purged) => tracing::debug!(purged, "Session purge complete"),
                Err(e) => tracing::warn!("Session purge failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
