//! Server-rendered HTML views.
//!
//! Pages are plain `format!` templates. Every interpolated value that
//! originates from users goes through [`html_escape`].

mod templates;

use axum::http::StatusCode;
use axum::response::Html;

use crate::auth::{Flash, FlashKind, Session};
use crate::db::Role;

pub use templates::*;

/// Escape HTML special characters
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// What the layout needs to know about the visitor
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub flash: Option<Flash>,
}

impl PageContext {
    /// Snapshot the session for rendering; consumes any pending flash
    pub fn from_session(session: &Session) -> Self {
        let state = session.state();
        let flash = session.take_flash();
        Self {
            is_admin: state.user_id.is_some() && state.role == Some(Role::Admin),
            user_id: state.user_id,
            display_name: state.display_name,
            flash,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Whether the visitor is the given user
    pub fn is_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

fn nav(ctx: &PageContext) -> String {
    let mut links = vec![r#"<a href="/resources">Resources</a>"#.to_string()];

    match &ctx.display_name {
        Some(name) if ctx.is_authenticated() => {
            if ctx.is_admin {
                links.push(r#"<a href="/admin/users">Members</a>"#.to_string());
            }
            links.push(format!(r#"<a href="/account">{}</a>"#, html_escape(name)));
            links.push(
                r#"<form method="post" action="/logout" class="inline"><button type="submit">Log out</button></form>"#
                    .to_string(),
            );
        }
        _ => {
            links.push(r#"<a href="/login">Log in</a>"#.to_string());
            links.push(r#"<a href="/register">Join</a>"#.to_string());
        }
    }

    links.join("\n            ")
}

fn flash_banner(flash: &Option<Flash>) -> String {
    match flash {
        Some(flash) => format!(
            r#"<div class="flash flash-{}" role="{}">{}</div>"#,
            flash.kind.as_str(),
            if flash.kind == FlashKind::Error { "alert" } else { "status" },
            html_escape(&flash.message)
        ),
        None => String::new(),
    }
}

/// Wrap a page body in the site layout
pub fn layout(ctx: &PageContext, title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} · OptoHub</title>
    <link rel="stylesheet" href="/static/site.css">
</head>
<body>
    <header class="site-header">
        <a href="/" class="brand">OptoHub</a>
        <nav>
            {nav}
        </nav>
    </header>
    <main>
        {flash}
{body}
    </main>
</body>
</html>"#,
        title = html_escape(title),
        nav = nav(ctx),
        flash = flash_banner(&ctx.flash),
        body = body,
    )
}

/// Render a full page
pub fn page(ctx: &PageContext, title: &str, body: &str) -> Html<String> {
    Html(layout(ctx, title, body))
}

/// Standalone error page; rendered without session context
pub fn error_page(status: StatusCode, message: &str) -> String {
    let heading = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        r#"        <section class="error">
            <h1>{code} {heading}</h1>
            <p>{message}</p>
            <p><a href="/">Back to OptoHub</a></p>
        </section>"#,
        code = status.as_u16(),
        heading = html_escape(heading),
        message = html_escape(message),
    );
    layout(&PageContext::default(), heading, &body)
}
