use thiserror::Error;

/// Failures of the authentication core
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email or wrong password; deliberately indistinguishable
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("This account has been deactivated")]
    AccountDisabled,

    /// Wrong, already used or expired reset token
    #[error("This reset link is invalid or has expired")]
    InvalidOrExpired,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("{0}")]
    WeakPassword(String),

    #[error("Failed to hash password: {0}")]
    Hashing(String),

    #[error("Credential store unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::Hashing(err.to_string())
    }
}
