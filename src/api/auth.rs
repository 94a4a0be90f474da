//! Login, logout, registration and password reset pages.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::error::{ApiError, ValidationErrorBuilder};
use crate::api::validation::{
    is_safe_return_path, validate_confirmation, validate_email, validate_name,
};
use crate::auth::{AuthError, FlashKind, Session};
use crate::db::{NewUser, UserSummary};
use crate::notifications::{new_member_email, password_reset_email};
use crate::ui::{self, PageContext};
use crate::AppState;

const FORGOT_PATH: &str = "/forgot-password";
const RESET_SENT_MESSAGE: &str =
    "If an account exists for that email, a reset link is on its way.";
const DELIVERY_FAILED_MESSAGE: &str = "We couldn't send the email right now. Please try again.";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    pub password: String,
    pub confirm_password: String,
}

fn redirect_to(path: &str) -> Response {
    Redirect::to(path).into_response()
}

/// GET /login
pub async fn login_page(session: Session) -> Response {
    if session.is_authenticated() {
        return redirect_to("/");
    }
    let ctx = PageContext::from_session(&session);
    ui::page(&ctx, "Log in", &ui::login_page("")).into_response()
}

/// POST /login
pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    if form.email.trim().is_empty() || form.password.is_empty() {
        session.flash(FlashKind::Error, AuthError::InvalidCredentials.to_string());
        return Ok(redirect_to("/login"));
    }

    match state.auth.authenticate(&form.email, &form.password).await {
        Ok(user) => {
            state.auth.establish_session(&session, &user);
            let destination = session
                .take_return_to()
                .filter(|path| is_safe_return_path(path))
                .unwrap_or_else(|| "/".to_string());
            session.flash(FlashKind::Success, format!("Welcome back, {}!", user.fname));
            Ok(redirect_to(&destination))
        }
        Err(err @ (AuthError::InvalidCredentials | AuthError::AccountDisabled)) => {
            session.flash(FlashKind::Error, err.to_string());
            Ok(redirect_to("/login"))
        }
        Err(err) => Err(err.into()),
    }
}

/// POST /logout
pub async fn logout(session: Session) -> Response {
    if let Some(user_id) = session.user_id() {
        tracing::debug!(user_id = %user_id, "Logged out");
    }
    session.destroy();
    redirect_to("/")
}

/// GET /register
pub async fn register_page(session: Session) -> Response {
    if session.is_authenticated() {
        return redirect_to("/");
    }
    let ctx = PageContext::from_session(&session);
    ui::page(&ctx, "Join", &ui::register_page("", "", "")).into_response()
}

async fn notify_admins(state: &AppState, user: &UserSummary) {
    let Some(admin_address) = state.config.email.admin_notify_address.as_deref() else {
        return;
    };
    let admin_url = format!("{}/admin/users", state.config.server.public_url.trim_end_matches('/'));
    let email = new_member_email(admin_address, &user.display_name(), &user.email, &admin_url);
    if let Err(e) = state.mailer.send(email).await {
        tracing::error!(user_id = %user.id, "New member notification failed: {}", e);
    }
}

/// POST /register
pub async fn register_submit(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Result<Response, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("fname", validate_name(&form.fname, "First name"))
        .check("lname", validate_name(&form.lname, "Last name"))
        .check("email", validate_email(&form.email))
        .check(
            "confirm_password",
            validate_confirmation(&form.password, &form.confirm_password),
        );

    if let Err(err) = errors.finish() {
        session.flash(FlashKind::Error, err.message());
        let ctx = PageContext::from_session(&session);
        let body = ui::register_page(&form.fname, &form.lname, &form.email);
        return Ok((err.status(), ui::page(&ctx, "Join", &body)).into_response());
    }

    let new_user = NewUser {
        fname: form.fname,
        lname: form.lname,
        email: form.email,
        password: form.password,
    };

    match state.auth.register(&new_user).await {
        Ok(user) => {
            notify_admins(&state, &user).await;
            state.auth.establish_session(&session, &user);
            session.flash(FlashKind::Success, "Your profile was created successfully!");
            Ok(redirect_to("/"))
        }
        Err(err @ (AuthError::EmailTaken | AuthError::WeakPassword(_))) => {
            session.flash(FlashKind::Error, err.to_string());
            let ctx = PageContext::from_session(&session);
            let body = ui::register_page(&new_user.fname, &new_user.lname, &new_user.email);
            let status = ApiError::from(err).status();
            Ok((status, ui::page(&ctx, "Join", &body)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

/// GET /forgot-password
pub async fn forgot_password_page(session: Session) -> Response {
    let ctx = PageContext::from_session(&session);
    ui::page(&ctx, "Forgot password", &ui::forgot_password_page()).into_response()
}

/// POST /forgot-password
///
/// Known and unknown emails get the same answer.
pub async fn forgot_password_submit(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Response, ApiError> {
    if let Err(message) = validate_email(&form.email) {
        session.flash(FlashKind::Error, message);
        return Ok(redirect_to(FORGOT_PATH));
    }

    let Some(issued) = state.auth.issue_reset_token(&form.email).await? else {
        session.flash(FlashKind::Success, RESET_SENT_MESSAGE);
        return Ok(redirect_to("/login"));
    };

    let reset_url = format!(
        "{}/reset-password/{}",
        state.config.server.public_url.trim_end_matches('/'),
        issued.token
    );
    let email = password_reset_email(
        &issued.user.email,
        &issued.user.fname,
        &reset_url,
        state.config.auth.reset_token_minutes,
    );

    match state.mailer.send(email).await {
        Ok(()) => {
            session.flash(FlashKind::Success, RESET_SENT_MESSAGE);
            Ok(redirect_to("/login"))
        }
        Err(e) => {
            // The token stays valid; a retry issues a fresh one anyway
            tracing::error!(user_id = %issued.user.id, "Reset email delivery failed: {}", e);
            session.flash(FlashKind::Error, DELIVERY_FAILED_MESSAGE);
            Ok(redirect_to(FORGOT_PATH))
        }
    }
}

/// GET /reset-password/:token
pub async fn reset_password_page(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    if !state.auth.reset_token_is_live(&token).await? {
        session.flash(FlashKind::Error, AuthError::InvalidOrExpired.to_string());
        return Ok(redirect_to(FORGOT_PATH));
    }
    let ctx = PageContext::from_session(&session);
    Ok(ui::page(&ctx, "Reset password", &ui::reset_password_page(&token)).into_response())
}

/// POST /reset-password/:token
pub async fn reset_password_submit(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, ApiError> {
    let retry_path = format!("/reset-password/{}", token);

    if let Err(message) = validate_confirmation(&form.password, &form.confirm_password) {
        session.flash(FlashKind::Error, message);
        return Ok(redirect_to(&retry_path));
    }

    match state.auth.consume_reset_token(&token, &form.password).await {
        Ok(user_id) => {
            // Sessions opened with the old password end here
            let dropped = state.sessions.destroy_for_user(&user_id).await?;
            if session.user_id().as_deref() == Some(user_id.as_str()) {
                session.clear_user();
            }
            tracing::info!(user_id = %user_id, dropped, "Sessions ended after password reset");
            session.flash(FlashKind::Success, "Your password has been reset. Please log in.");
            Ok(redirect_to("/login"))
        }
        Err(AuthError::WeakPassword(message)) => {
            session.flash(FlashKind::Error, message);
            Ok(redirect_to(&retry_path))
        }
        Err(err @ AuthError::InvalidOrExpired) => {
            session.flash(FlashKind::Error, err.to_string());
            Ok(redirect_to(FORGOT_PATH))
        }
        Err(err) => Err(err.into()),
    }
}
