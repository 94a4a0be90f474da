//! Input validation for submitted forms.
//!
//! Each validator returns `Err(message)` with a user-facing message. Collect
//! several with the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// One `@`, no whitespace, a dot in the domain part
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Resource slugs as produced by `generate_slug`
    static ref SLUG_REGEX: Regex = Regex::new(
        r"^[a-z0-9]+(-[a-z0-9]+)*$"
    ).unwrap();
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a first or last name; `label` names the field in the message
pub fn validate_name(name: &str, label: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{} is required", label));
    }

    if name.chars().count() > 100 {
        return Err(format!("{} is too long (max 100 characters)", label));
    }

    Ok(())
}

/// A password and its confirmation must agree
pub fn validate_confirmation(password: &str, confirmation: &str) -> Result<(), String> {
    if password != confirmation {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("Title is required".to_string());
    }

    if title.chars().count() > 200 {
        return Err("Title is too long (max 200 characters)".to_string());
    }

    Ok(())
}

pub fn validate_subtitle(subtitle: &str) -> Result<(), String> {
    if subtitle.trim().chars().count() > 300 {
        return Err("Subtitle is too long (max 300 characters)".to_string());
    }
    Ok(())
}

pub fn validate_comment(content: &str) -> Result<(), String> {
    let content = content.trim();
    if content.is_empty() {
        return Err("Comment cannot be empty".to_string());
    }

    if content.chars().count() > 5000 {
        return Err("Comment is too long (max 5000 characters)".to_string());
    }

    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() || slug.len() > 220 || !SLUG_REGEX.is_match(slug) {
        return Err("Invalid resource address".to_string());
    }
    Ok(())
}

/// Only same-site absolute paths may be used as a post-login destination
pub fn is_safe_return_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && !path.chars().any(|c| c.is_control())
}
