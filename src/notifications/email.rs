//! SMTP delivery and the bodies of system emails.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{DeliveryError, Mailer, OutgoingEmail};
use crate::config::EmailConfig;
use crate::ui::html_escape;

/// Sends mail through the configured SMTP relay
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, DeliveryError> {
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| DeliveryError::Address("from address not configured".to_string()))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address)
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Address(e.to_string()))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| DeliveryError::Address(e.to_string()))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html.clone()),
                    ),
            )
            .map_err(|e| DeliveryError::Message(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| DeliveryError::Transport("SMTP host not configured".to_string()))?;

        let builder = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), DeliveryError> {
        let message = self.build_message(&email)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email sent successfully"
        );
        Ok(())
    }

    fn delivers(&self) -> bool {
        true
    }
}

const EMAIL_STYLE: &str = r#"
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; margin: 0; padding: 0; background-color: #f4f7f6; }
        .container { max-width: 560px; margin: 0 auto; padding: 40px 20px; }
        .card { background-color: #ffffff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06); overflow: hidden; }
        .header { background: #0f766e; color: white; padding: 28px 24px; text-align: center; }
        .header h1 { margin: 0; font-size: 22px; font-weight: 600; }
        .content { padding: 28px 24px; }
        .content p { margin: 0 0 16px; color: #374151; line-height: 1.6; }
        .button-container { text-align: center; margin: 28px 0; }
        .button { display: inline-block; background: #0f766e; color: white !important; text-decoration: none; padding: 12px 28px; border-radius: 6px; font-weight: 500; }
        .note { color: #6b7280; font-size: 13px; text-align: center; }
        .footer { padding: 20px; text-align: center; color: #9ca3af; font-size: 12px; border-top: 1px solid #f3f4f6; }
"#;

fn wrap_html(title: &str, inner: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header"><h1>{title}</h1></div>
            <div class="content">
{inner}
            </div>
            <div class="footer"><p>OptoHub - the optometry community</p></div>
        </div>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        style = EMAIL_STYLE,
        inner = inner,
    )
}

pub fn render_password_reset_html(name: &str, reset_url: &str, expires_in_minutes: i64) -> String {
    let inner = format!(
        r#"                <p>Hi {name},</p>
                <p>Someone asked to reset the password for your OptoHub account. Use the button below to choose a new one.</p>
                <div class="button-container">
                    <a href="{url}" class="button">Reset password</a>
                </div>
                <p class="note">This link expires in {minutes} minutes and can be used once. If you didn't ask for a reset, ignore this email and your password stays the same.</p>"#,
        name = html_escape(name),
        url = html_escape(reset_url),
        minutes = expires_in_minutes,
    );
    wrap_html("Password reset", &inner)
}

pub fn render_password_reset_text(name: &str, reset_url: &str, expires_in_minutes: i64) -> String {
    format!(
        r#"Password reset

Hi {name},

Someone asked to reset the password for your OptoHub account. To choose a new one, visit:
{url}

This link expires in {minutes} minutes and can be used once.

If you didn't ask for a reset, ignore this email and your password stays the same."#,
        name = name,
        url = reset_url,
        minutes = expires_in_minutes,
    )
}

pub fn render_new_member_html(member_name: &str, member_email: &str, admin_url: &str) -> String {
    let inner = format!(
        r#"                <p><strong>{name}</strong> ({email}) just joined OptoHub.</p>
                <div class="button-container">
                    <a href="{url}" class="button">Review members</a>
                </div>"#,
        name = html_escape(member_name),
        email = html_escape(member_email),
        url = html_escape(admin_url),
    );
    wrap_html("New member", &inner)
}

pub fn render_new_member_text(member_name: &str, member_email: &str, admin_url: &str) -> String {
    format!(
        "New member\n\n{} ({}) just joined OptoHub.\n\nReview members: {}",
        member_name, member_email, admin_url
    )
}
