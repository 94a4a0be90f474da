//! Self-service account pages. All routes sit behind `require_login`.

use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::error::{ApiError, ValidationErrorBuilder};
use crate::api::gates::CurrentUser;
use crate::api::validation::{validate_confirmation, validate_email, validate_name};
use crate::auth::{AuthError, FlashKind};
use crate::db::{User, UserSummary};
use crate::ui::{self, PageContext};
use crate::AppState;

const ACCOUNT_PATH: &str = "/account";

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    pub fname: String,
    pub lname: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordForm {
    pub current_password: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountForm {
    pub password: String,
}

fn back_to_account() -> Response {
    Redirect::to(ACCOUNT_PATH).into_response()
}

async fn load_member(state: &AppState, user_id: &str) -> Result<UserSummary, ApiError> {
    User::find_by_id(&state.db, user_id)
        .await?
        .map(UserSummary::from)
        .ok_or_else(|| ApiError::not_found("Account not found"))
}

/// GET /account
pub async fn account_page(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Response, ApiError> {
    let member = load_member(&state, &user.id).await?;
    let ctx = PageContext::from_session(&user.session);
    Ok(ui::page(&ctx, "Your account", &ui::account_page(&member)).into_response())
}

/// POST /account
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<ProfileForm>,
) -> Result<Response, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("fname", validate_name(&form.fname, "First name"))
        .check("lname", validate_name(&form.lname, "Last name"))
        .check("email", validate_email(&form.email));
    if let Err(err) = errors.finish() {
        user.session.flash(FlashKind::Error, err.message());
        return Ok(back_to_account());
    }

    if let Some(owner) = User::find_by_email(&state.db, &form.email).await? {
        if owner.id != user.id {
            user.session
                .flash(FlashKind::Error, AuthError::EmailTaken.to_string());
            return Ok(back_to_account());
        }
    }

    User::update_profile(&state.db, &user.id, &form.fname, &form.lname, &form.email).await?;
    let member = load_member(&state, &user.id).await?;
    user.session
        .refresh_identity(member.role, &member.display_name());

    tracing::info!(user_id = %user.id, "Profile updated");
    user.session.flash(FlashKind::Success, "Profile updated");
    Ok(back_to_account())
}

/// POST /account/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Response, ApiError> {
    if let Err(message) = validate_confirmation(&form.password, &form.confirm_password) {
        user.session.flash(FlashKind::Error, message);
        return Ok(back_to_account());
    }

    match state
        .auth
        .change_password(&user.id, &form.current_password, &form.password)
        .await
    {
        Ok(()) => {
            // Other devices log in again; this one continues on a fresh token
            state.sessions.destroy_for_user(&user.id).await?;
            let member = load_member(&state, &user.id).await?;
            state.auth.establish_session(&user.session, &member);
            user.session.flash(FlashKind::Success, "Password changed");
            Ok(back_to_account())
        }
        Err(AuthError::InvalidCredentials) => {
            user.session
                .flash(FlashKind::Error, "Current password is incorrect");
            Ok(back_to_account())
        }
        Err(AuthError::WeakPassword(message)) => {
            user.session.flash(FlashKind::Error, message);
            Ok(back_to_account())
        }
        Err(err) => Err(err.into()),
    }
}

/// POST /account/delete
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<DeleteAccountForm>,
) -> Result<Response, ApiError> {
    match state.auth.confirm_password(&user.id, &form.password).await {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            user.session.flash(FlashKind::Error, "Password is incorrect");
            return Ok(back_to_account());
        }
        Err(err) => return Err(err.into()),
    }

    User::delete(&state.db, &user.id).await?;
    user.session.destroy();
    tracing::info!(user_id = %user.id, "Account deleted");
    Ok(Redirect::to("/").into_response())
}
