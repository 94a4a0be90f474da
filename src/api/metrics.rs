//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! Besides per-route request counts and durations, the auth service records
//! login outcomes, legacy credential upgrades and issued reset tokens.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const LOGIN_ATTEMPTS_TOTAL: &str = "login_attempts_total";
pub const CREDENTIAL_UPGRADES_TOTAL: &str = "credential_upgrades_total";
pub const RESET_TOKENS_ISSUED_TOTAL: &str = "reset_tokens_issued_total";
pub const MEMBERS_TOTAL: &str = "members_total";
pub const LEGACY_CREDENTIALS_REMAINING: &str = "legacy_credentials_remaining";

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Call once during startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        LOGIN_ATTEMPTS_TOTAL,
        "Login attempts by outcome (success/bad_password/unknown_email/disabled)"
    );
    describe_counter!(
        CREDENTIAL_UPGRADES_TOTAL,
        "Legacy plaintext credentials re-hashed on login"
    );
    describe_counter!(RESET_TOKENS_ISSUED_TOTAL, "Password reset tokens issued");
    describe_gauge!(MEMBERS_TOTAL, "Registered member accounts");
    describe_gauge!(
        LEGACY_CREDENTIALS_REMAINING,
        "Accounts still holding a plaintext credential"
    );

    Ok(handle)
}

/// GET /metrics - Prometheus text format, no authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db)
        .await
    {
        gauge!(MEMBERS_TOTAL).set(count as f64);
    }

    if let Ok(count) = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE password NOT LIKE '$argon2%'",
    )
    .fetch_one(&state.db)
    .await
    {
        gauge!(LEGACY_CREDENTIALS_REMAINING).set(count as f64);
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Matched path keeps tokens and slugs out of the label set
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_login(outcome: &'static str) {
    counter!(LOGIN_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_credential_upgrade() {
    counter!(CREDENTIAL_UPGRADES_TOTAL).increment(1);
}

pub fn record_reset_token_issued() {
    counter!(RESET_TOKENS_ISSUED_TOTAL).increment(1);
}
