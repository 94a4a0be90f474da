pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod notifications;
pub mod ui;

pub use db::DbPool;

use chrono::Duration;
use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::auth::{AuthService, SessionStore};
use crate::notifications::Mailer;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub auth: AuthService,
    pub sessions: SessionStore,
    pub mailer: Arc<dyn Mailer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let auth = AuthService::new(
            db.clone(),
            Duration::minutes(config.auth.reset_token_minutes),
        );
        let sessions = SessionStore::new(
            db.clone(),
            Duration::minutes(config.session.idle_timeout_minutes),
        );
        Self {
            config,
            db,
            auth,
            sessions,
            mailer,
            rate_limiter,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
