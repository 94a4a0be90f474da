//! Request-scoped session state and its server-side store.
//!
//! The client only ever holds an opaque random token; the `sessions` table is
//! keyed by the token's SHA-256 digest. Expiry is rolling: every save pushes
//! `expires_at` one idle window into the future.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::auth::password::{generate_token, hash_token};
use crate::db::{timestamp, DbPool, Role, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FlashKind::Success),
            "error" => Some(FlashKind::Error),
            _ => None,
        }
    }
}

/// One-shot message shown on the next rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

/// Everything a session may carry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<String>,
    pub return_to: Option<String>,
    pub flash: Option<Flash>,
}

impl SessionState {
    /// Anonymous sessions without pending data are not worth storing
    fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.return_to.is_none() && self.flash.is_none()
    }

    fn from_record(record: &SessionRecord) -> Self {
        let flash = match (&record.flash_kind, &record.flash_message) {
            (Some(kind), Some(message)) => FlashKind::parse(kind).map(|kind| Flash {
                kind,
                message: message.clone(),
            }),
            _ => None,
        };
        Self {
            user_id: record.user_id.clone(),
            role: record.role.as_deref().and_then(|r| r.parse().ok()),
            display_name: record.display_name.clone(),
            return_to: record.return_to.clone(),
            flash,
        }
    }
}

#[derive(Debug)]
struct SessionInner {
    token: Option<String>,
    state: SessionState,
    created_at: String,
    rotate: bool,
    destroyed: bool,
}

/// Handle to the session of the request being served.
///
/// Cloned into request extensions by the session middleware; handlers mutate it
/// and the middleware persists the result once the response is produced.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    /// A fresh anonymous session with no token issued yet
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self::build(None, SessionState::default(), timestamp(now))
    }

    fn existing(token: String, state: SessionState, created_at: String) -> Self {
        Self::build(Some(token), state, created_at)
    }

    fn build(token: Option<String>, state: SessionState, created_at: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                token,
                state,
                created_at,
                rotate: false,
                destroyed: false,
            })),
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.lock().state.user_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().state.user_id.is_some()
    }

    /// Cached role; gates that matter re-read it from the store
    pub fn role(&self) -> Option<Role> {
        self.inner.lock().state.role
    }

    pub fn display_name(&self) -> Option<String> {
        self.inner.lock().state.display_name.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Bind the session to a user and rotate its token
    pub fn set_user(&self, user_id: &str, role: Role, display_name: &str) {
        let mut inner = self.inner.lock();
        inner.state.user_id = Some(user_id.to_string());
        inner.state.role = Some(role);
        inner.state.display_name = Some(display_name.to_string());
        inner.rotate = true;
    }

    /// Refresh the cached role and name from the credential store
    pub fn refresh_identity(&self, role: Role, display_name: &str) {
        let mut inner = self.inner.lock();
        inner.state.role = Some(role);
        inner.state.display_name = Some(display_name.to_string());
    }

    /// Drop the identity and rotate the token; pending messages survive
    pub fn clear_user(&self) {
        let mut inner = self.inner.lock();
        inner.state.user_id = None;
        inner.state.role = None;
        inner.state.display_name = None;
        inner.rotate = true;
    }

    pub fn set_return_to(&self, path: &str) {
        self.inner.lock().state.return_to = Some(path.to_string());
    }

    pub fn take_return_to(&self) -> Option<String> {
        self.inner.lock().state.return_to.take()
    }

    pub fn flash(&self, kind: FlashKind, message: impl Into<String>) {
        self.inner.lock().state.flash = Some(Flash {
            kind,
            message: message.into(),
        });
    }

    pub fn take_flash(&self) -> Option<Flash> {
        self.inner.lock().state.flash.take()
    }

    /// Drop the session entirely (logout, account deletion)
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::default();
        inner.destroyed = true;
    }

    fn plan(&self) -> PersistPlan {
        let inner = self.inner.lock();
        PersistPlan {
            token: inner.token.clone(),
            state: inner.state.clone(),
            created_at: inner.created_at.clone(),
            rotate: inner.rotate,
            destroyed: inner.destroyed,
        }
    }
}

struct PersistPlan {
    token: Option<String>,
    state: SessionState,
    created_at: String,
    rotate: bool,
    destroyed: bool,
}

/// What the client's cookie must become after a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieChange {
    Keep,
    Set(String),
    Remove,
}

/// Server-side session persistence
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: DbPool,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(db: DbPool, idle_timeout: Duration) -> Self {
        Self { db, idle_timeout }
    }

    /// Resolve a cookie token to a live session, dropping it if it has expired
    pub async fn load(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>, sqlx::Error> {
        let token_hash = hash_token(token);
        match SessionRecord::find_live(&self.db, &token_hash, &timestamp(now)).await? {
            Some(record) => Ok(Some(Session::existing(
                token.to_string(),
                SessionState::from_record(&record),
                record.created_at,
            ))),
            None => {
                SessionRecord::delete(&self.db, &token_hash).await?;
                Ok(None)
            }
        }
    }

    /// Write the session back and report how the cookie has to change
    pub async fn save(&self, session: &Session, now: DateTime<Utc>) -> Result<CookieChange, sqlx::Error> {
        let plan = session.plan();

        if plan.destroyed || plan.state.is_empty() {
            return match plan.token {
                Some(token) => {
                    SessionRecord::delete(&self.db, &hash_token(&token)).await?;
                    Ok(CookieChange::Remove)
                }
                None => Ok(CookieChange::Keep),
            };
        }

        let flash = plan.state.flash.as_ref();
        let mut record = SessionRecord {
            token_hash: String::new(),
            user_id: plan.state.user_id.clone(),
            role: plan.state.role.map(|r| r.as_str().to_string()),
            display_name: plan.state.display_name.clone(),
            return_to: plan.state.return_to.clone(),
            flash_kind: flash.map(|f| f.kind.as_str().to_string()),
            flash_message: flash.map(|f| f.message.clone()),
            expires_at: timestamp(now + self.idle_timeout),
            created_at: plan.created_at,
        };

        let (token, change) = match plan.token {
            Some(existing) if !plan.rotate => {
                record.token_hash = hash_token(&existing);
                if !record.update(&self.db).await? {
                    // Ended elsewhere while this request ran
                    let mut inner = session.inner.lock();
                    inner.token = None;
                    inner.destroyed = true;
                    return Ok(CookieChange::Remove);
                }
                (existing, CookieChange::Keep)
            }
            old => {
                if let Some(old) = old {
                    SessionRecord::delete(&self.db, &hash_token(&old)).await?;
                }
                let fresh = generate_token();
                record.token_hash = hash_token(&fresh);
                record.insert(&self.db).await?;
                (fresh.clone(), CookieChange::Set(fresh))
            }
        };

        {
            let mut inner = session.inner.lock();
            inner.token = Some(token);
            inner.rotate = false;
        }

        Ok(change)
    }

    /// Remove every session belonging to a user
    pub async fn destroy_for_user(&self, user_id: &str) -> Result<u64, sqlx::Error> {
        SessionRecord::delete_for_user(&self.db, user_id).await
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        SessionRecord::delete_expired(&self.db, &timestamp(now)).await
    }
}
