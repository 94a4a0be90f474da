//! Member moderation. Mounted behind `require_admin`.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::gates::CurrentUser;
use crate::auth::FlashKind;
use crate::db::{User, UserSummary};
use crate::ui::{self, PageContext};
use crate::AppState;

const USERS_PATH: &str = "/admin/users";

fn back_to_users() -> Response {
    Redirect::to(USERS_PATH).into_response()
}

/// Load the target of a moderation action, refusing self-moderation
async fn moderation_target(
    state: &AppState,
    admin: &CurrentUser,
    id: &str,
) -> Result<Option<User>, ApiError> {
    if id == admin.id {
        admin
            .session
            .flash(FlashKind::Error, "You can't change your own role or status");
        return Ok(None);
    }
    User::find_by_id(&state.db, id)
        .await?
        .map(Some)
        .ok_or_else(|| ApiError::not_found("Member not found"))
}

/// GET /admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    admin: CurrentUser,
) -> Result<Response, ApiError> {
    let users: Vec<UserSummary> = User::list(&state.db)
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();
    let ctx = PageContext::from_session(&admin.session);
    Ok(ui::page(&ctx, "Members", &ui::admin_users_page(&users, &admin.id)).into_response())
}

/// POST /admin/users/:id/role
pub async fn toggle_role(
    State(state): State<Arc<AppState>>,
    admin: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(target) = moderation_target(&state, &admin, &id).await? else {
        return Ok(back_to_users());
    };

    let role = target.role().toggled();
    User::set_role(&state.db, &target.id, role).await?;
    tracing::info!(admin_id = %admin.id, user_id = %target.id, %role, "Role changed");

    admin.session.flash(
        FlashKind::Success,
        format!("{} {} is now {}", target.fname, target.lname, role),
    );
    Ok(back_to_users())
}

/// POST /admin/users/:id/active
pub async fn toggle_active(
    State(state): State<Arc<AppState>>,
    admin: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(target) = moderation_target(&state, &admin, &id).await? else {
        return Ok(back_to_users());
    };

    let active = !target.active;
    User::set_active(&state.db, &target.id, active).await?;
    if !active {
        let dropped = state.sessions.destroy_for_user(&target.id).await?;
        tracing::info!(admin_id = %admin.id, user_id = %target.id, dropped, "Member deactivated");
    } else {
        tracing::info!(admin_id = %admin.id, user_id = %target.id, "Member reactivated");
    }

    let status = if active { "activated" } else { "deactivated" };
    admin.session.flash(
        FlashKind::Success,
        format!("{} {} has been {}", target.fname, target.lname, status),
    );
    Ok(back_to_users())
}
