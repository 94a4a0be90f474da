//! Knowledge-base articles, their contributors and comments.

use sqlx::{FromRow, SqlitePool};

use crate::db::now;

/// `post_type` value for comments attached to resource articles
pub const RESOURCE_POST_TYPE: &str = "resource";

#[derive(Debug, Clone, FromRow)]
pub struct ResourceArticle {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub slug: String,
    pub content: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Article joined with its author's name; the author may have deleted their account
#[derive(Debug, Clone, FromRow)]
pub struct ResourceWithAuthor {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub slug: String,
    pub content: String,
    pub created_by: Option<String>,
    pub updated_at: String,
    pub author_fname: Option<String>,
    pub author_lname: Option<String>,
}

impl ResourceWithAuthor {
    pub fn author_name(&self) -> String {
        match (&self.author_fname, &self.author_lname) {
            (Some(f), Some(l)) => format!("{} {}", f, l),
            _ => "Former member".to_string(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Contributor {
    pub id: String,
    pub fname: String,
    pub lname: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CommentWithAuthor {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub fname: String,
    pub lname: String,
}

/// Title, subtitle and body of an article as submitted
#[derive(Debug, Clone)]
pub struct ResourceFields {
    pub title: String,
    pub subtitle: String,
    pub content: String,
}

impl ResourceArticle {
    pub async fn list(db: &SqlitePool) -> Result<Vec<ResourceArticle>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM resources_articles ORDER BY updated_at DESC")
            .fetch_all(db)
            .await
    }

    pub async fn find_by_slug(
        db: &SqlitePool,
        slug: &str,
    ) -> Result<Option<ResourceArticle>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM resources_articles WHERE slug = ?")
            .bind(slug)
            .fetch_optional(db)
            .await
    }

    pub async fn find_with_author(
        db: &SqlitePool,
        slug: &str,
    ) -> Result<Option<ResourceWithAuthor>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT ra.id, ra.title, ra.subtitle, ra.slug, ra.content, ra.created_by, ra.updated_at,
                   u.fname AS author_fname, u.lname AS author_lname
            FROM resources_articles ra
            LEFT JOIN users u ON u.id = ra.created_by
            WHERE ra.slug = ?
            "#,
        )
        .bind(slug)
        .fetch_optional(db)
        .await
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<ResourceArticle>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM resources_articles WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn slug_exists(db: &SqlitePool, slug: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources_articles WHERE slug = ?")
            .bind(slug)
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    /// Insert an article and record its author as the first contributor
    pub async fn create(
        db: &SqlitePool,
        fields: &ResourceFields,
        slug: &str,
        author_id: &str,
    ) -> Result<ResourceArticle, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        let mut tx = db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO resources_articles (id, title, subtitle, slug, content, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&fields.title)
        .bind(&fields.subtitle)
        .bind(slug)
        .bind(&fields.content)
        .bind(author_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO resources_contributors (article_id, user_id) VALUES (?, ?)")
            .bind(&id)
            .bind(author_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ResourceArticle {
            id,
            title: fields.title.clone(),
            subtitle: fields.subtitle.clone(),
            slug: slug.to_string(),
            content: fields.content.clone(),
            created_by: Some(author_id.to_string()),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Update an article and add the editor as a contributor (duplicates ignored)
    pub async fn update(
        db: &SqlitePool,
        id: &str,
        fields: &ResourceFields,
        editor_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        sqlx::query(
            "UPDATE resources_articles SET title = ?, subtitle = ?, content = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&fields.title)
        .bind(&fields.subtitle)
        .bind(&fields.content)
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO resources_contributors (article_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(editor_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    pub async fn contributors(
        db: &SqlitePool,
        article_id: &str,
    ) -> Result<Vec<Contributor>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT u.id, u.fname, u.lname
            FROM resources_contributors rc
            JOIN users u ON u.id = rc.user_id
            WHERE rc.article_id = ?
            ORDER BY u.lname, u.fname
            "#,
        )
        .bind(article_id)
        .fetch_all(db)
        .await
    }
}

/// Who wrote a comment and where it hangs
#[derive(Debug, Clone, FromRow)]
pub struct CommentOwner {
    pub user_id: String,
    pub post_id: String,
    pub post_type: String,
}

pub struct Comment;

impl Comment {
    pub async fn create(
        db: &SqlitePool,
        post_type: &str,
        post_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<String, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, post_type, user_id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(post_id)
        .bind(post_type)
        .bind(user_id)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;
        Ok(id)
    }

    pub async fn owner(db: &SqlitePool, id: &str) -> Result<Option<CommentOwner>, sqlx::Error> {
        sqlx::query_as("SELECT user_id, post_id, post_type FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn update_content(db: &SqlitePool, id: &str, content: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Comments on a post, newest first
    pub async fn for_post(
        db: &SqlitePool,
        post_type: &str,
        post_id: &str,
    ) -> Result<Vec<CommentWithAuthor>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, u.fname, u.lname
            FROM comments c
            JOIN users u ON u.id = c.user_id
            WHERE c.post_id = ? AND c.post_type = ?
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(post_id)
        .bind(post_type)
        .fetch_all(db)
        .await
    }
}
