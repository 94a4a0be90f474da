//! Outbound email.
//!
//! Handlers depend on the [`Mailer`] trait only. With SMTP configured the
//! [`SmtpMailer`] delivers through lettre; otherwise [`LogMailer`] writes the
//! message to the log so password reset stays usable in development.

mod email;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmailConfig;

pub use email::{
    render_new_member_html, render_new_member_text, render_password_reset_html,
    render_password_reset_text, SmtpMailer,
};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("could not build message: {0}")]
    Message(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// A rendered email with HTML and plain text alternatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError>;

    /// Whether messages actually leave the process
    fn delivers(&self) -> bool;
}

/// Mailer used when no SMTP relay is configured
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        tracing::warn!(
            to = %email.to,
            subject = %email.subject,
            "Email not configured, message logged instead of sent"
        );
        tracing::debug!(body = %email.text, "Undelivered email body");
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

/// Pick the mailer matching the email configuration
pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn Mailer> {
    if config.is_configured() {
        Arc::new(SmtpMailer::new(config.clone()))
    } else {
        Arc::new(LogMailer)
    }
}

/// Build the password reset email for `to`
pub fn password_reset_email(to: &str, name: &str, reset_url: &str, expires_in_minutes: i64) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your OptoHub password".to_string(),
        html: render_password_reset_html(name, reset_url, expires_in_minutes),
        text: render_password_reset_text(name, reset_url, expires_in_minutes),
    }
}

/// Build the notice sent to the site admin address when someone registers
pub fn new_member_email(to: &str, member_name: &str, member_email: &str, admin_url: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("New OptoHub member: {}", member_name),
        html: render_new_member_html(member_name, member_email, admin_url),
        text: render_new_member_text(member_name, member_email, admin_url),
    }
}

/// Collects messages in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryMailer {
    pub outbox: parking_lot::Mutex<Vec<OutgoingEmail>>,
}

#[cfg(test)]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        self.outbox.lock().push(email);
        Ok(())
    }

    fn delivers(&self) -> bool {
        true
    }
}
