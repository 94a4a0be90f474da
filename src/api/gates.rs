//! Session middleware and the login/admin gates.
//!
//! `session_layer` wraps the whole router: it resolves the cookie to a
//! [`Session`], refreshes the cached identity from the credential store,
//! runs the handler and persists whatever the handler changed. The gates are
//! applied as route layers on the protected route groups.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Method, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::validation::is_safe_return_path;
use crate::auth::{CookieChange, Session};
use crate::db::{Role, User, UserSummary};
use crate::AppState;

pub const LOGIN_PATH: &str = "/login";

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.session.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.session.secure_cookie)
        .build()
}

fn removal_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build((state.config.session.cookie_name.clone(), ""))
        .path("/")
        .build()
}

/// Bring the cached role and name in line with the user row.
///
/// Sessions of deleted or deactivated users lose their identity.
async fn refresh_identity(state: &AppState, session: &Session) -> Result<(), sqlx::Error> {
    let Some(user_id) = session.user_id() else {
        return Ok(());
    };

    match User::find_by_id(&state.db, &user_id).await? {
        Some(user) if user.active => {
            let summary = UserSummary::from(user);
            session.refresh_identity(summary.role, &summary.display_name());
        }
        Some(_) => {
            tracing::info!(user_id = %user_id, "Dropping session of deactivated account");
            session.clear_user();
        }
        None => {
            tracing::info!(user_id = %user_id, "Dropping session of deleted account");
            session.clear_user();
        }
    }
    Ok(())
}

/// Resolve, expose and persist the request's session
pub async fn session_layer(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let now = Utc::now();
    let cookie_token = jar
        .get(&state.config.session.cookie_name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());

    let loaded = match &cookie_token {
        Some(token) => match state.sessions.load(token, now).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!("Session lookup failed: {}", e);
                return ApiError::database("Sessions are unavailable, please try again later")
                    .into_response();
            }
        },
        None => None,
    };
    let stale_cookie = cookie_token.is_some() && loaded.is_none();
    let session = loaded.unwrap_or_else(|| Session::anonymous(now));

    if let Err(e) = refresh_identity(&state, &session).await {
        tracing::error!("Identity refresh failed: {}", e);
        return ApiError::database("Sessions are unavailable, please try again later")
            .into_response();
    }

    request.extensions_mut().insert(session.clone());
    let response = next.run(request).await;

    let change = match state.sessions.save(&session, Utc::now()).await {
        Ok(change) => change,
        Err(e) => {
            tracing::error!("Failed to persist session: {}", e);
            return ApiError::database("Sessions are unavailable, please try again later")
                .into_response();
        }
    };

    let jar = match change {
        CookieChange::Set(token) => jar.add(session_cookie(&state, token)),
        CookieChange::Remove => jar.remove(removal_cookie(&state)),
        CookieChange::Keep if stale_cookie => jar.remove(removal_cookie(&state)),
        CookieChange::Keep => return response,
    };

    (jar, response).into_response()
}

fn redirect_to_login(session: &Session, request: &Request<Body>) -> Response {
    // Only page views are worth resuming; a replayed POST would lose its body
    if request.method() == Method::GET {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        if is_safe_return_path(path) {
            session.set_return_to(path);
        }
    }
    Redirect::to(LOGIN_PATH).into_response()
}

fn request_session(request: &Request<Body>) -> Result<Session, ApiError> {
    request
        .extensions()
        .get::<Session>()
        .cloned()
        .ok_or_else(|| ApiError::internal("Session layer missing"))
}

/// Anonymous visitors are sent to the login page
pub async fn require_login(request: Request<Body>, next: Next) -> Response {
    let session = match request_session(&request) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    if !session.is_authenticated() {
        return redirect_to_login(&session, &request);
    }

    next.run(request).await
}

/// Only users whose stored role is `admin` get through.
///
/// The role is read from the credential store on every request so a
/// downgrade takes effect immediately. Store failures deny access.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let session = match request_session(&request) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let Some(user_id) = session.user_id() else {
        return redirect_to_login(&session, &request);
    };

    match state.auth.current_role(&user_id).await {
        Ok(Some(Role::Admin)) => next.run(request).await,
        Ok(_) => {
            tracing::warn!(user_id = %user_id, path = %request.uri().path(), "Non-admin denied");
            ApiError::forbidden("Admins only").into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, "Role lookup failed, denying: {}", e);
            ApiError::internal("Something went wrong, please try again later").into_response()
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Session layer missing"))
    }
}

/// The logged-in user of a request behind `require_login`
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
    pub session: Session,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        match session.user_id() {
            Some(id) => Ok(CurrentUser {
                id,
                role: session.role().unwrap_or(Role::User),
                session,
            }),
            None => Err(Redirect::to(LOGIN_PATH).into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    use crate::auth::password::hash_password;
    use crate::config::Config;
    use crate::db::{init_in_memory, NewUser};
    use crate::notifications::MemoryMailer;

    async fn admin_state() -> (Arc<AppState>, String) {
        let db = init_in_memory().await.unwrap();
        let new_user = NewUser {
            fname: "Root".to_string(),
            lname: "Admin".to_string(),
            email: "root@example.com".to_string(),
            password: "P@ssw0rd!".to_string(),
        };
        let hash = hash_password(&new_user.password).unwrap();
        let admin = User::insert(&db, &new_user, &hash, Role::Admin).await.unwrap();
        let state = Arc::new(AppState::new(
            Config::default(),
            db,
            Arc::new(MemoryMailer::default()),
        ));
        (state, admin.id)
    }

    fn guarded(state: Arc<AppState>, ran: Arc<AtomicBool>) -> Router {
        Router::new()
            .route(
                "/admin/users",
                get(move || {
                    let ran = ran.clone();
                    async move {
                        ran.store(true, Ordering::SeqCst);
                        "member list"
                    }
                }),
            )
            .route_layer(middleware::from_fn_with_state(state, require_admin))
    }

    fn admin_request(user_id: &str) -> Request<Body> {
        let session = Session::anonymous(Utc::now());
        session.set_user(user_id, Role::Admin, "Root Admin");
        let mut request = Request::builder()
            .uri("/admin/users")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(session);
        request
    }

    #[tokio::test]
    async fn test_require_admin_lets_admin_through() {
        let (state, admin_id) = admin_state().await;
        let ran = Arc::new(AtomicBool::new(false));

        let response = guarded(state, ran.clone())
            .oneshot(admin_request(&admin_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_require_admin_fails_closed_without_store() {
        let (state, admin_id) = admin_state().await;
        let ran = Arc::new(AtomicBool::new(false));
        state.db.close().await;

        let response = guarded(state, ran.clone())
            .oneshot(admin_request(&admin_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_require_admin_sends_anonymous_to_login() {
        let (state, _) = admin_state().await;
        let ran = Arc::new(AtomicBool::new(false));

        let mut request = Request::builder()
            .uri("/admin/users")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(Session::anonymous(Utc::now()));

        let response = guarded(state, ran.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(!ran.load(Ordering::SeqCst));
    }
}
