//! Resources knowledge base: articles and their comments.
//!
//! Reading is public; writing requires a login.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::error::{ApiError, ValidationErrorBuilder};
use crate::api::gates::CurrentUser;
use crate::api::validation::{validate_comment, validate_slug, validate_subtitle, validate_title};
use crate::auth::{FlashKind, Session};
use crate::db::{Comment, DbPool, ResourceArticle, ResourceFields, RESOURCE_POST_TYPE};
use crate::ui::{self, PageContext};
use crate::AppState;

/// Used when a title has no usable characters
const FALLBACK_SLUG: &str = "resource";
const MAX_SLUG_BASE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ResourceForm {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub content: String,
}

impl ResourceForm {
    fn into_fields(self) -> ResourceFields {
        ResourceFields {
            title: self.title.trim().to_string(),
            subtitle: self.subtitle.trim().to_string(),
            content: self.content.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewCommentForm {
    pub post_id: String,
    pub post_type: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct EditCommentForm {
    pub content: String,
}

/// Generate a URL-safe slug from a title
pub fn generate_slug(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() || c == '-' || c == '_' {
                Some('-')
            } else {
                None
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let slug: String = slug.chars().take(MAX_SLUG_BASE).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// First free slug among `base`, `base-1`, `base-2`, ...
async fn unique_slug(db: &DbPool, base: &str) -> Result<String, sqlx::Error> {
    if !ResourceArticle::slug_exists(db, base).await? {
        return Ok(base.to_string());
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !ResourceArticle::slug_exists(db, &candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn validate_fields(fields: &ResourceFields) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("title", validate_title(&fields.title))
        .check("subtitle", validate_subtitle(&fields.subtitle));
    errors.finish()
}

fn article_path(slug: &str) -> String {
    format!("/resources/{}", slug)
}

async fn article_by_slug(state: &AppState, slug: &str) -> Result<ResourceArticle, ApiError> {
    if validate_slug(slug).is_err() {
        return Err(ApiError::not_found("Resource not found"));
    }
    ResourceArticle::find_by_slug(&state.db, slug)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource not found"))
}

/// GET /
pub async fn home(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    let mut recent = ResourceArticle::list(&state.db).await?;
    recent.truncate(5);
    let ctx = PageContext::from_session(&session);
    Ok(ui::page(&ctx, "Home", &ui::home_page(&ctx, &recent)).into_response())
}

/// GET /resources
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    let articles = ResourceArticle::list(&state.db).await?;
    let ctx = PageContext::from_session(&session);
    Ok(ui::page(&ctx, "Resources", &ui::resources_list_page(&ctx, &articles)).into_response())
}

/// GET /resources/new
pub async fn new_resource_page(user: CurrentUser) -> Response {
    let ctx = PageContext::from_session(&user.session);
    let empty = ResourceFields {
        title: String::new(),
        subtitle: String::new(),
        content: String::new(),
    };
    ui::page(
        &ctx,
        "New resource",
        &ui::resource_form_page("New resource", "/resources/new", &empty),
    )
    .into_response()
}

/// POST /resources/new
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<ResourceForm>,
) -> Result<Response, ApiError> {
    let fields = form.into_fields();
    if let Err(err) = validate_fields(&fields) {
        user.session.flash(FlashKind::Error, err.message());
        let ctx = PageContext::from_session(&user.session);
        let body = ui::resource_form_page("New resource", "/resources/new", &fields);
        return Ok((err.status(), ui::page(&ctx, "New resource", &body)).into_response());
    }

    let base = generate_slug(&fields.title);
    let slug = unique_slug(&state.db, &base).await?;
    let article = ResourceArticle::create(&state.db, &fields, &slug, &user.id).await?;

    tracing::info!(user_id = %user.id, slug = %article.slug, "Resource created");
    user.session
        .flash(FlashKind::Success, "New post created successfully");
    Ok(Redirect::to(&article_path(&article.slug)).into_response())
}

/// GET /resources/:slug
pub async fn view_resource(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    if validate_slug(&slug).is_err() {
        return Err(ApiError::not_found("Resource not found"));
    }
    let article = ResourceArticle::find_with_author(&state.db, &slug)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource not found"))?;
    let contributors = ResourceArticle::contributors(&state.db, &article.id).await?;
    let comments = Comment::for_post(&state.db, RESOURCE_POST_TYPE, &article.id).await?;

    let ctx = PageContext::from_session(&session);
    let body = ui::resource_detail_page(&ctx, &article, &contributors, &comments);
    Ok(ui::page(&ctx, &article.title, &body).into_response())
}

/// GET /resources/:slug/edit
pub async fn edit_resource_page(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let article = article_by_slug(&state, &slug).await?;
    let fields = ResourceFields {
        title: article.title,
        subtitle: article.subtitle,
        content: article.content,
    };
    let action = format!("{}/edit", article_path(&article.slug));
    let ctx = PageContext::from_session(&user.session);
    let body = ui::resource_form_page("Edit resource", &action, &fields);
    Ok(ui::page(&ctx, "Edit resource", &body).into_response())
}

/// POST /resources/:slug/edit
pub async fn update_resource(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(slug): Path<String>,
    Form(form): Form<ResourceForm>,
) -> Result<Response, ApiError> {
    let article = article_by_slug(&state, &slug).await?;
    let fields = form.into_fields();

    if let Err(err) = validate_fields(&fields) {
        user.session.flash(FlashKind::Error, err.message());
        let action = format!("{}/edit", article_path(&article.slug));
        let ctx = PageContext::from_session(&user.session);
        let body = ui::resource_form_page("Edit resource", &action, &fields);
        return Ok((err.status(), ui::page(&ctx, "Edit resource", &body)).into_response());
    }

    ResourceArticle::update(&state.db, &article.id, &fields, &user.id).await?;
    tracing::info!(user_id = %user.id, slug = %article.slug, "Resource updated");
    user.session
        .flash(FlashKind::Success, "Post updated successfully");
    Ok(Redirect::to(&article_path(&article.slug)).into_response())
}

/// POST /comments/new
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<NewCommentForm>,
) -> Result<Response, ApiError> {
    if form.post_type != RESOURCE_POST_TYPE {
        return Err(ApiError::bad_request("Comments are not supported here"));
    }
    let article = ResourceArticle::find_by_id(&state.db, &form.post_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    let back = article_path(&article.slug);

    if let Err(message) = validate_comment(&form.content) {
        user.session.flash(FlashKind::Error, message);
        return Ok(Redirect::to(&back).into_response());
    }

    Comment::create(
        &state.db,
        RESOURCE_POST_TYPE,
        &article.id,
        &user.id,
        form.content.trim(),
    )
    .await?;
    user.session
        .flash(FlashKind::Success, "Comment created successfully");
    Ok(Redirect::to(&back).into_response())
}

/// Resolve a comment the current user owns, plus the page to return to
async fn owned_comment(
    state: &AppState,
    user: &CurrentUser,
    id: &str,
) -> Result<String, ApiError> {
    let owner = Comment::owner(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    if owner.user_id != user.id {
        tracing::warn!(user_id = %user.id, comment_id = %id, "Comment change by non-owner refused");
        return Err(ApiError::forbidden("Not allowed"));
    }

    let back = match ResourceArticle::find_by_id(&state.db, &owner.post_id).await? {
        Some(article) if owner.post_type == RESOURCE_POST_TYPE => article_path(&article.slug),
        _ => "/resources".to_string(),
    };
    Ok(back)
}

/// POST /comments/:id/edit
pub async fn update_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<EditCommentForm>,
) -> Result<Response, ApiError> {
    let back = owned_comment(&state, &user, &id).await?;

    if let Err(message) = validate_comment(&form.content) {
        user.session.flash(FlashKind::Error, message);
        return Ok(Redirect::to(&back).into_response());
    }

    Comment::update_content(&state.db, &id, form.content.trim()).await?;
    user.session
        .flash(FlashKind::Success, "Comment updated successfully");
    Ok(Redirect::to(&back).into_response())
}

/// POST /comments/:id/delete
pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let back = owned_comment(&state, &user, &id).await?;
    Comment::delete(&state.db, &id).await?;
    user.session
        .flash(FlashKind::Success, "Comment deleted successfully");
    Ok(Redirect::to(&back).into_response())
}
