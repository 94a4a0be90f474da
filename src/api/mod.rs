mod account;
mod admin;
pub mod auth;
pub mod error;
pub mod gates;
pub mod metrics;
pub mod rate_limit;
mod resources;
pub mod validation;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api::error::ApiError;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public pages
    let public_routes = Router::new()
        .route("/", get(resources::home))
        .route("/resources", get(resources::list_resources))
        .route("/resources/:slug", get(resources::view_resource))
        .route("/logout", post(auth::logout));

    // Credential forms, rate limited on submit
    let auth_routes = Router::new()
        .route("/login", get(auth::login_page).post(auth::login_submit))
        .route("/register", get(auth::register_page).post(auth::register_submit))
        .route(
            "/forgot-password",
            get(auth::forgot_password_page).post(auth::forgot_password_submit),
        )
        .route(
            "/reset-password/:token",
            get(auth::reset_password_page).post(auth::reset_password_submit),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Anything that writes on behalf of a member
    let member_routes = Router::new()
        .route("/account", get(account::account_page).post(account::update_profile))
        .route("/account/password", post(account::change_password))
        .route("/account/delete", post(account::delete_account))
        .route(
            "/resources/new",
            get(resources::new_resource_page).post(resources::create_resource),
        )
        .route(
            "/resources/:slug/edit",
            get(resources::edit_resource_page).post(resources::update_resource),
        )
        .route("/comments/new", post(resources::create_comment))
        .route("/comments/:id/edit", post(resources::update_comment))
        .route("/comments/:id/delete", post(resources::delete_comment))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_content,
        ))
        .route_layer(middleware::from_fn(gates::require_login));

    let admin_routes = Router::new()
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id/role", post(admin::toggle_role))
        .route("/admin/users/:id/active", post(admin::toggle_active))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gates::require_admin,
        ));

    let pages = Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(member_routes)
        .merge(admin_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gates::session_layer,
        ));

    // Added after the session layer so they never touch the session store
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest_service("/static", ServeDir::new(&state.config.server.static_dir))
        .merge(pages)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> ApiError {
    ApiError::not_found("Page not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::{init_in_memory, NewUser, Role, User};
    use crate::notifications::{DeliveryError, Mailer, MemoryMailer, OutgoingEmail};
    use crate::auth::password::hash_password;

    struct Harness {
        app: Router,
        state: Arc<AppState>,
        mailer: Arc<MemoryMailer>,
    }

    async fn harness() -> Harness {
        let mailer = Arc::new(MemoryMailer::default());
        let (app, state) = app_with_mailer(mailer.clone()).await;
        Harness { app, state, mailer }
    }

    async fn app_with_mailer(mailer: Arc<dyn Mailer>) -> (Router, Arc<AppState>) {
        let mut config = Config::default();
        config.rate_limit.enabled = false;
        config.server.public_url = "http://opto.test".to_string();
        let db = init_in_memory().await.unwrap();
        let state = Arc::new(AppState::new(config, db, mailer));
        (create_router(state.clone()), state)
    }

    /// Keeps what it was asked to send, then reports an SMTP failure
    #[derive(Default)]
    struct UnreachableSmtp {
        attempted: parking_lot::Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait::async_trait]
    impl Mailer for UnreachableSmtp {
        async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
            self.attempted.lock().push(email);
            Err(DeliveryError::Transport("connection refused".to_string()))
        }

        fn delivers(&self) -> bool {
            true
        }
    }

    async fn add_member(state: &AppState, email: &str, password: &str, role: Role) -> String {
        let new_user = NewUser {
            fname: "Test".to_string(),
            lname: "Member".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let hash = hash_password(password).unwrap();
        User::insert(&state.db, &new_user, &hash, role).await.unwrap().id
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    /// `name=value` of the session cookie the response sets, if any
    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter(|v| v.starts_with("optohub_session="))
            .filter_map(|v| v.split(';').next())
            .find(|pair| pair.len() > "optohub_session=".len())
            .map(str::to_string)
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn login(app: &Router, email: &str, password: &str) -> String {
        let body = format!("email={}&password={}", email, password);
        let response = send(app, post_form("/login", &body, None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        session_cookie(&response).expect("login sets a session cookie")
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness().await;
        let response = send(&h.app, get("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found_page() {
        let h = harness().await;
        let response = send(&h.app, get("/nowhere", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Page not found"));
    }

    #[tokio::test]
    async fn test_public_pages_need_no_session() {
        let h = harness().await;
        let response = send(&h.app, get("/resources", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
    }

    #[tokio::test]
    async fn test_login_gate_remembers_destination() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;

        let response = send(&h.app, get("/resources/new", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        let anonymous = session_cookie(&response).expect("return path is stored");

        let response = send(
            &h.app,
            post_form("/login", "email=ada@example.com&password=P@ssw0rd!", Some(anonymous.as_str())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/resources/new");

        let rotated = session_cookie(&response).expect("login issues a new token");
        assert_ne!(rotated, anonymous);

        let response = send(&h.app, get("/resources/new", Some(rotated.as_str()))).await;
        assert_eq!(response.status(), StatusCode::OK);

        // The pre-login token grants nothing
        let response = send(&h.app, get("/resources/new", Some(anonymous.as_str()))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_failed_login_shows_generic_error() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;

        for body in [
            "email=ada@example.com&password=wrong-password",
            "email=ghost@example.com&password=wrong-password",
        ] {
            let response = send(&h.app, post_form("/login", body, None)).await;
            assert_eq!(location(&response), "/login");
            let cookie = session_cookie(&response).unwrap();

            let page = body_text(send(&h.app, get("/login", Some(cookie.as_str()))).await).await;
            assert!(page.contains("Invalid email or password"));
        }
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;
        let cookie = login(&h.app, "ada@example.com", "P@ssw0rd!").await;

        let response = send(&h.app, post_form("/logout", "", Some(cookie.as_str()))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = send(&h.app, get("/account", Some(cookie.as_str()))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn test_admin_gate_reads_role_fresh() {
        let h = harness().await;
        let admin_id = add_member(&h.state, "root@example.com", "P@ssw0rd!", Role::Admin).await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;

        let response = send(&h.app, get("/admin/users", None)).await;
        assert_eq!(location(&response), "/login");

        let member = login(&h.app, "ada@example.com", "P@ssw0rd!").await;
        let response = send(&h.app, get("/admin/users", Some(member.as_str()))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("Admins only"));

        let admin = login(&h.app, "root@example.com", "P@ssw0rd!").await;
        let response = send(&h.app, get("/admin/users", Some(admin.as_str()))).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Downgrade takes effect on the very next request
        User::set_role(&h.state.db, &admin_id, Role::User).await.unwrap();
        let response = send(&h.app, get("/admin/users", Some(admin.as_str()))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_cannot_moderate_self() {
        let h = harness().await;
        let admin_id = add_member(&h.state, "root@example.com", "P@ssw0rd!", Role::Admin).await;
        let member_id = add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;
        let admin = login(&h.app, "root@example.com", "P@ssw0rd!").await;

        let uri = format!("/admin/users/{}/role", admin_id);
        send(&h.app, post_form(&uri, "", Some(admin.as_str()))).await;
        assert_eq!(User::role_of(&h.state.db, &admin_id).await.unwrap(), Some(Role::Admin));

        let uri = format!("/admin/users/{}/role", member_id);
        send(&h.app, post_form(&uri, "", Some(admin.as_str()))).await;
        assert_eq!(User::role_of(&h.state.db, &member_id).await.unwrap(), Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_deactivation_ends_member_sessions() {
        let h = harness().await;
        add_member(&h.state, "root@example.com", "P@ssw0rd!", Role::Admin).await;
        let member_id = add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;
        let admin = login(&h.app, "root@example.com", "P@ssw0rd!").await;
        let member = login(&h.app, "ada@example.com", "P@ssw0rd!").await;

        let uri = format!("/admin/users/{}/active", member_id);
        send(&h.app, post_form(&uri, "", Some(admin.as_str()))).await;

        let response = send(&h.app, get("/account", Some(member.as_str()))).await;
        assert_eq!(location(&response), "/login");

        let response = send(
            &h.app,
            post_form("/login", "email=ada@example.com&password=P@ssw0rd!", None),
        )
        .await;
        let cookie = session_cookie(&response).unwrap();
        let page = body_text(send(&h.app, get("/login", Some(cookie.as_str()))).await).await;
        assert!(page.contains("deactivated"));
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;

        let response = send(&h.app, post_form("/forgot-password", "email=ada@example.com", None)).await;
        assert_eq!(location(&response), "/login");

        let link = {
            let outbox = h.mailer.outbox.lock();
            assert_eq!(outbox.len(), 1);
            assert_eq!(outbox[0].to, "ada@example.com");
            outbox[0]
                .text
                .lines()
                .find(|l| l.starts_with("http://opto.test/reset-password/"))
                .unwrap()
                .to_string()
        };
        let path = link.trim_start_matches("http://opto.test");

        let response = send(&h.app, get(path, None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &h.app,
            post_form(path, "password=N3w-password&confirm_password=N3w-password", None),
        )
        .await;
        assert_eq!(location(&response), "/login");

        // Used once
        let response = send(&h.app, get(path, None)).await;
        assert_eq!(location(&response), "/forgot-password");

        login(&h.app, "ada@example.com", "N3w-password").await;
    }

    #[tokio::test]
    async fn test_reset_delivery_failure_asks_to_retry() {
        let mailer = Arc::new(UnreachableSmtp::default());
        let (app, state) = app_with_mailer(mailer.clone()).await;
        add_member(&state, "ada@example.com", "P@ssw0rd!", Role::User).await;

        let response = send(&app, post_form("/forgot-password", "email=ada@example.com", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/forgot-password");
        let cookie = session_cookie(&response).unwrap();

        let page = body_text(send(&app, get("/forgot-password", Some(cookie.as_str()))).await).await;
        assert!(page.contains("send the email right now. Please try again."));
        assert!(!page.contains("a reset link is on its way"));

        // The token was issued before delivery failed and stays valid
        let token = {
            let attempted = mailer.attempted.lock();
            assert_eq!(attempted.len(), 1);
            attempted[0]
                .text
                .lines()
                .find_map(|l| l.strip_prefix("http://opto.test/reset-password/"))
                .unwrap()
                .to_string()
        };
        assert!(state.auth.reset_token_is_live(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email_looks_the_same() {
        let h = harness().await;
        let response = send(&h.app, post_form("/forgot-password", "email=ghost@example.com", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
        assert!(h.mailer.outbox.lock().is_empty());
    }

    #[tokio::test]
    async fn test_register_logs_in_and_rejects_duplicates() {
        let h = harness().await;
        let form = "fname=Ada&lname=Lovelace&email=Ada@Example.com&password=P@ssw0rd!&confirm_password=P@ssw0rd!";

        let response = send(&h.app, post_form("/register", form, None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = session_cookie(&response).unwrap();
        let response = send(&h.app, get("/account", Some(cookie.as_str()))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("ada@example.com"));

        let duplicate = form.replace("Ada@Example.com", "ADA@example.com");
        let response = send(&h.app, post_form("/register", &duplicate, None)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_comment_owner_only() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;
        add_member(&h.state, "grace@example.com", "P@ssw0rd!", Role::User).await;
        let ada = login(&h.app, "ada@example.com", "P@ssw0rd!").await;
        let grace = login(&h.app, "grace@example.com", "P@ssw0rd!").await;

        let response = send(
            &h.app,
            post_form("/resources/new", "title=Dry+Eye+Basics&subtitle=&content=Blink.", Some(ada.as_str())),
        )
        .await;
        assert_eq!(location(&response), "/resources/dry-eye-basics");

        let article = crate::db::ResourceArticle::find_by_slug(&h.state.db, "dry-eye-basics")
            .await
            .unwrap()
            .unwrap();
        let body = format!("post_id={}&post_type=resource&content=Nice", article.id);
        send(&h.app, post_form("/comments/new", &body, Some(ada.as_str()))).await;

        let comments = crate::db::Comment::for_post(&h.state.db, "resource", &article.id)
            .await
            .unwrap();
        assert_eq!(comments.len(), 1);
        let comment_uri = format!("/comments/{}/edit", comments[0].id);

        let response = send(&h.app, post_form(&comment_uri, "content=Hijacked", Some(grace.as_str()))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.contains("Not allowed"));

        let response = send(&h.app, post_form(&comment_uri, "content=Edited", Some(ada.as_str()))).await;
        assert_eq!(location(&response), "/resources/dry-eye-basics");

        let page = body_text(send(&h.app, get("/resources/dry-eye-basics", None)).await).await;
        assert!(page.contains("Edited"));
        assert!(!page.contains("Hijacked"));
    }

    #[tokio::test]
    async fn test_second_resource_with_same_title_gets_suffix() {
        let h = harness().await;
        add_member(&h.state, "ada@example.com", "P@ssw0rd!", Role::User).await;
        let ada = login(&h.app, "ada@example.com", "P@ssw0rd!").await;

        let form = "title=Contact+Lenses&content=Care";
        let first = send(&h.app, post_form("/resources/new", form, Some(ada.as_str()))).await;
        let second = send(&h.app, post_form("/resources/new", form, Some(ada.as_str()))).await;
        assert_eq!(location(&first), "/resources/contact-lenses");
        assert_eq!(location(&second), "/resources/contact-lenses-1");
    }
}
