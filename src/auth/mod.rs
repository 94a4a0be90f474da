//! Authentication core: password hashing, sessions and the auth service.
//!
//! HTTP-facing pieces (session middleware, login/admin gates) live in
//! [`crate::api::gates`].

pub mod error;
pub mod password;
pub mod service;
pub mod session;

pub use error::AuthError;
pub use service::{AuthService, IssuedResetToken};
pub use session::{CookieChange, Flash, FlashKind, Session, SessionState, SessionStore};
