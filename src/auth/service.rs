//! Credential verification, legacy migration and password reset.

use chrono::{DateTime, Duration, Utc};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::api::metrics;
use crate::auth::error::AuthError;
use crate::auth::password::{
    credential_matches, generate_token, hash_password, hash_token, is_hashed, legacy_matches,
    validate_password_strength, verify_dummy,
};
use crate::auth::session::Session;
use crate::db::{timestamp, DbPool, NewUser, Role, User, UserSummary};

/// A freshly issued reset token, returned so the caller can email it
#[derive(Debug, Clone)]
pub struct IssuedResetToken {
    /// Plain token; only its digest is stored
    pub token: String,
    pub user: UserSummary,
    pub expires_at: DateTime<Utc>,
}

/// Argon2 work runs on the blocking pool so it never stalls request tasks
async fn hash_off_runtime(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(AuthError::from)
}

async fn matches_off_runtime(attempt: &str, stored: &str) -> Result<bool, AuthError> {
    let attempt = attempt.to_string();
    let stored = stored.to_string();
    spawn_blocking(move || credential_matches(&attempt, &stored))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

async fn dummy_off_runtime(attempt: &str) {
    let attempt = attempt.to_string();
    if let Err(e) = spawn_blocking(move || verify_dummy(&attempt)).await {
        warn!("Dummy verification task failed: {}", e);
    }
}

#[derive(Debug, Clone)]
pub struct AuthService {
    db: DbPool,
    reset_ttl: Duration,
}

impl AuthService {
    pub fn new(db: DbPool, reset_ttl: Duration) -> Self {
        Self { db, reset_ttl }
    }

    /// Check an email/password pair.
    ///
    /// The disabled check happens before any credential comparison. A legacy
    /// plaintext credential that matches is re-hashed and written back before
    /// returning.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<UserSummary, AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let user = match User::find_by_email(&self.db, email).await? {
            Some(user) => user,
            None => {
                dummy_off_runtime(password).await;
                metrics::record_login("unknown_email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.active {
            metrics::record_login("disabled");
            info!(user_id = %user.id, "Login refused for deactivated account");
            return Err(AuthError::AccountDisabled);
        }

        if is_hashed(&user.password) {
            if !matches_off_runtime(password, &user.password).await? {
                metrics::record_login("bad_password");
                return Err(AuthError::InvalidCredentials);
            }
        } else {
            if !legacy_matches(password, &user.password) {
                metrics::record_login("bad_password");
                return Err(AuthError::InvalidCredentials);
            }
            self.upgrade_legacy(&user, password).await?;
        }

        metrics::record_login("success");
        debug!(user_id = %user.id, "User authenticated");
        Ok(UserSummary::from(user))
    }

    async fn upgrade_legacy(&self, user: &User, password: &str) -> Result<(), AuthError> {
        let hash = hash_off_runtime(password).await?;
        if User::upgrade_legacy_password(&self.db, &user.id, &user.password, &hash).await? {
            metrics::record_credential_upgrade();
            info!(user_id = %user.id, "Upgraded legacy plaintext credential");
        } else {
            warn!(user_id = %user.id, "Credential changed concurrently, legacy upgrade skipped");
        }
        Ok(())
    }

    /// Bind an authenticated user to the request's session
    pub fn establish_session(&self, session: &Session, user: &UserSummary) {
        session.set_user(&user.id, user.role, &user.display_name());
    }

    /// Fresh role lookup, never served from the session cache
    pub async fn current_role(&self, user_id: &str) -> Result<Option<Role>, AuthError> {
        Ok(User::role_of(&self.db, user_id).await?)
    }

    /// Create a member account with the `user` role
    pub async fn register(&self, new_user: &NewUser) -> Result<UserSummary, AuthError> {
        if let Some(message) = validate_password_strength(&new_user.password) {
            return Err(AuthError::WeakPassword(message));
        }
        if User::find_by_email(&self.db, &new_user.email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let hash = hash_off_runtime(&new_user.password).await?;
        let user = match User::insert(&self.db, new_user, &hash, Role::User).await {
            Ok(user) => user,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AuthError::EmailTaken)
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %user.id, "Registered new member");
        Ok(UserSummary::from(user))
    }

    /// Re-check the password of a logged-in user before a sensitive change
    pub async fn confirm_password(&self, user_id: &str, password: &str) -> Result<(), AuthError> {
        let user = User::find_by_id(&self.db, user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !matches_off_runtime(password, &user.password).await? {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }

    /// Change a password after re-checking the current one
    pub async fn change_password(
        &self,
        user_id: &str,
        current: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.confirm_password(user_id, current).await?;
        if let Some(message) = validate_password_strength(new_password) {
            return Err(AuthError::WeakPassword(message));
        }

        let hash = hash_off_runtime(new_password).await?;
        User::update_password(&self.db, user_id, &hash).await?;
        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Issue a reset token for the account behind `email`.
    ///
    /// Returns `Ok(None)` for unknown emails; callers must answer both cases
    /// identically.
    pub async fn issue_reset_token(&self, email: &str) -> Result<Option<IssuedResetToken>, AuthError> {
        self.issue_reset_token_at(email, Utc::now()).await
    }

    pub(crate) async fn issue_reset_token_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedResetToken>, AuthError> {
        let user = match User::find_by_email(&self.db, email).await? {
            Some(user) => user,
            None => {
                debug!("Password reset requested for unknown email");
                return Ok(None);
            }
        };

        let token = generate_token();
        let expires_at = now + self.reset_ttl;
        User::set_reset_token(&self.db, &user.id, &hash_token(&token), &timestamp(expires_at)).await?;

        metrics::record_reset_token_issued();
        info!(user_id = %user.id, "Issued password reset token");

        Ok(Some(IssuedResetToken {
            token,
            user: UserSummary::from(user),
            expires_at,
        }))
    }

    /// Whether a reset token is currently usable (for rendering the reset form)
    pub async fn reset_token_is_live(&self, token: &str) -> Result<bool, AuthError> {
        let found =
            User::find_by_reset_token(&self.db, &hash_token(token), &timestamp(Utc::now())).await?;
        Ok(found.is_some())
    }

    /// Set a new password using a reset token, consuming the token.
    ///
    /// Returns the id of the account whose password changed.
    pub async fn consume_reset_token(&self, token: &str, new_password: &str) -> Result<String, AuthError> {
        self.consume_reset_token_at(token, new_password, Utc::now()).await
    }

    pub(crate) async fn consume_reset_token_at(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        if let Some(message) = validate_password_strength(new_password) {
            return Err(AuthError::WeakPassword(message));
        }

        let hash = hash_off_runtime(new_password).await?;
        match User::consume_reset_token(&self.db, &hash_token(token), &hash, &timestamp(now)).await? {
            Some(user_id) => {
                info!(user_id = %user_id, "Password reset completed");
                Ok(user_id)
            }
            None => Err(AuthError::InvalidOrExpired),
        }
    }

    /// Create the configured bootstrap admin unless an admin already exists
    pub async fn ensure_admin_user(&self, email: &str, password: &str) -> Result<(), AuthError> {
        if User::admin_exists(&self.db).await? {
            return Ok(());
        }

        if let Some(existing) = User::find_by_email(&self.db, email).await? {
            User::set_role(&self.db, &existing.id, Role::Admin).await?;
            info!(user_id = %existing.id, "Promoted existing member to bootstrap admin");
            return Ok(());
        }

        let new_user = NewUser {
            fname: "Site".to_string(),
            lname: "Administrator".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        if let Some(message) = validate_password_strength(password) {
            return Err(AuthError::WeakPassword(message));
        }
        let hash = hash_off_runtime(password).await?;
        let user = User::insert(&self.db, &new_user, &hash, Role::Admin).await?;
        info!(user_id = %user.id, "Created bootstrap admin user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::db::init_in_memory;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    async fn service() -> (AuthService, DbPool) {
        let db = init_in_memory().await.unwrap();
        (AuthService::new(db.clone(), Duration::minutes(30)), db)
    }

    fn new_user(email: &str, password: &str) -> NewUser {
        NewUser {
            fname: "Ada".to_string(),
            lname: "Lovelace".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    async fn stored_credential(db: &DbPool, id: &str) -> String {
        User::find_by_id(db, id).await.unwrap().unwrap().password
    }

    /// Insert a row holding a plaintext credential, as older releases did
    async fn legacy_user(db: &DbPool, email: &str, plaintext: &str) -> User {
        User::insert(db, &new_user(email, plaintext), plaintext, Role::User)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hashed_credential_succeeds_after_failures() {
        let (auth, _db) = service().await;
        auth.register(&new_user("a@example.com", "P@ssw0rd!")).await.unwrap();

        for _ in 0..3 {
            assert!(matches!(
                auth.authenticate("a@example.com", "wrong-password").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        let user = auth.authenticate("a@example.com", "P@ssw0rd!").await.unwrap();
        assert_eq!(user.email, "a@example.com");
    }

    #[tokio::test]
    async fn test_verification_leaves_runtime_free() {
        let stored = hash_password("P@ssw0rd!").unwrap();
        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            })
        };

        // Single-threaded runtime: the ticker only runs if verification yields
        assert!(matches_off_runtime("P@ssw0rd!", &stored).await.unwrap());
        assert!(ticks.load(Ordering::Relaxed) > 0);

        let before = ticks.load(Ordering::Relaxed);
        let hash = hash_off_runtime("N3w-password").await.unwrap();
        assert!(ticks.load(Ordering::Relaxed) > before);
        assert!(verify_password("N3w-password", &hash));
        ticker.abort();
    }

    #[tokio::test]
    async fn test_unknown_email_is_invalid_credentials() {
        let (auth, _db) = service().await;
        assert!(matches!(
            auth.authenticate("nobody@example.com", "whatever1").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let (auth, _db) = service().await;
        auth.register(&new_user("Mixed@Example.com", "P@ssw0rd!")).await.unwrap();
        assert!(auth.authenticate("mixed@EXAMPLE.com", "P@ssw0rd!").await.is_ok());
    }

    #[tokio::test]
    async fn test_legacy_plaintext_is_upgraded_on_login() {
        let (auth, db) = service().await;
        let user = legacy_user(&db, "b@example.com", "hunter2").await;

        auth.authenticate("b@example.com", "hunter2").await.unwrap();

        let stored = stored_credential(&db, &user.id).await;
        assert_ne!(stored, "hunter2");
        assert!(is_hashed(&stored));
        assert!(verify_password("hunter2", &stored));

        // Second login takes the hashed path
        auth.authenticate("b@example.com", "hunter2").await.unwrap();
        assert_eq!(stored_credential(&db, &user.id).await, stored);
    }

    #[tokio::test]
    async fn test_legacy_wrong_password_leaves_credential_alone() {
        let (auth, db) = service().await;
        let user = legacy_user(&db, "c@example.com", "hunter2").await;

        assert!(matches!(
            auth.authenticate("c@example.com", "hunter3").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(stored_credential(&db, &user.id).await, "hunter2");
    }

    #[tokio::test]
    async fn test_disabled_account_reported_before_password_check() {
        let (auth, db) = service().await;
        let user = auth.register(&new_user("d@example.com", "P@ssw0rd!")).await.unwrap();
        auth.authenticate("d@example.com", "P@ssw0rd!").await.unwrap();

        User::set_active(&db, &user.id, false).await.unwrap();

        assert!(matches!(
            auth.authenticate("d@example.com", "P@ssw0rd!").await,
            Err(AuthError::AccountDisabled)
        ));
        assert!(matches!(
            auth.authenticate("d@example.com", "not-the-password").await,
            Err(AuthError::AccountDisabled)
        ));
    }

    #[tokio::test]
    async fn test_disabled_legacy_account_is_not_upgraded() {
        let (auth, db) = service().await;
        let user = legacy_user(&db, "e@example.com", "hunter2").await;
        User::set_active(&db, &user.id, false).await.unwrap();

        assert!(matches!(
            auth.authenticate("e@example.com", "hunter2").await,
            Err(AuthError::AccountDisabled)
        ));
        assert_eq!(stored_credential(&db, &user.id).await, "hunter2");
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_weak_passwords() {
        let (auth, _db) = service().await;
        auth.register(&new_user("f@example.com", "P@ssw0rd!")).await.unwrap();

        assert!(matches!(
            auth.register(&new_user("F@EXAMPLE.com", "P@ssw0rd!")).await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            auth.register(&new_user("g@example.com", "short")).await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_token_consumed_exactly_once() {
        let (auth, db) = service().await;
        let user = auth.register(&new_user("h@example.com", "P@ssw0rd!")).await.unwrap();

        let issued = auth.issue_reset_token("h@example.com").await.unwrap().unwrap();
        assert_eq!(issued.user.id, user.id);
        assert!(auth.reset_token_is_live(&issued.token).await.unwrap());

        auth.consume_reset_token(&issued.token, "N3w-password").await.unwrap();
        assert!(matches!(
            auth.consume_reset_token(&issued.token, "Another-pass1").await,
            Err(AuthError::InvalidOrExpired)
        ));

        let row = User::find_by_id(&db, &user.id).await.unwrap().unwrap();
        assert!(row.reset_token.is_none());
        assert!(row.reset_token_expires.is_none());
        assert!(auth.authenticate("h@example.com", "N3w-password").await.is_ok());
        assert!(auth.authenticate("h@example.com", "P@ssw0rd!").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_token_expires() {
        let (auth, _db) = service().await;
        auth.register(&new_user("i@example.com", "P@ssw0rd!")).await.unwrap();

        let issued_at = Utc::now();
        let issued = auth
            .issue_reset_token_at("i@example.com", issued_at)
            .await
            .unwrap()
            .unwrap();

        let late = issued_at + Duration::minutes(31);
        assert!(matches!(
            auth.consume_reset_token_at(&issued.token, "N3w-password", late).await,
            Err(AuthError::InvalidOrExpired)
        ));
        assert!(auth.authenticate("i@example.com", "P@ssw0rd!").await.is_ok());
    }

    #[tokio::test]
    async fn test_new_reset_token_supersedes_old() {
        let (auth, _db) = service().await;
        auth.register(&new_user("j@example.com", "P@ssw0rd!")).await.unwrap();

        let first = auth.issue_reset_token("j@example.com").await.unwrap().unwrap();
        let second = auth.issue_reset_token("j@example.com").await.unwrap().unwrap();
        assert_ne!(first.token, second.token);

        assert!(matches!(
            auth.consume_reset_token(&first.token, "N3w-password").await,
            Err(AuthError::InvalidOrExpired)
        ));
        auth.consume_reset_token(&second.token, "N3w-password").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_for_unknown_email_is_silent() {
        let (auth, _db) = service().await;
        assert!(auth.issue_reset_token("ghost@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_rejects_weak_password_without_consuming() {
        let (auth, _db) = service().await;
        auth.register(&new_user("k@example.com", "P@ssw0rd!")).await.unwrap();
        let issued = auth.issue_reset_token("k@example.com").await.unwrap().unwrap();

        assert!(matches!(
            auth.consume_reset_token(&issued.token, "").await,
            Err(AuthError::WeakPassword(_))
        ));
        auth.consume_reset_token(&issued.token, "N3w-password").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears_legacy_credential() {
        let (auth, db) = service().await;
        let user = legacy_user(&db, "l@example.com", "hunter2").await;
        let issued = auth.issue_reset_token("l@example.com").await.unwrap().unwrap();

        auth.consume_reset_token(&issued.token, "N3w-password").await.unwrap();
        assert!(is_hashed(&stored_credential(&db, &user.id).await));
        assert!(auth.authenticate("l@example.com", "hunter2").await.is_err());
    }

    #[tokio::test]
    async fn test_current_role_reflects_downgrade() {
        let (auth, db) = service().await;
        let user = auth.register(&new_user("m@example.com", "P@ssw0rd!")).await.unwrap();
        User::set_role(&db, &user.id, Role::Admin).await.unwrap();
        assert_eq!(auth.current_role(&user.id).await.unwrap(), Some(Role::Admin));

        User::set_role(&db, &user.id, Role::User).await.unwrap();
        assert_eq!(auth.current_role(&user.id).await.unwrap(), Some(Role::User));
    }

    #[tokio::test]
    async fn test_change_password_requires_current() {
        let (auth, _db) = service().await;
        let user = auth.register(&new_user("n@example.com", "P@ssw0rd!")).await.unwrap();

        assert!(matches!(
            auth.change_password(&user.id, "wrong-one", "N3w-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        auth.change_password(&user.id, "P@ssw0rd!", "N3w-password").await.unwrap();
        assert!(auth.authenticate("n@example.com", "N3w-password").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let (auth, db) = service().await;
        auth.ensure_admin_user("root@example.com", "Adm1n-password").await.unwrap();
        auth.ensure_admin_user("root@example.com", "Adm1n-password").await.unwrap();

        let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(admins, 1);
        let admin = auth.authenticate("root@example.com", "Adm1n-password").await.unwrap();
        assert_eq!(admin.role, Role::Admin);
    }
}
