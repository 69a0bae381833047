use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::users::repo_types::{Page, PageRequest, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already taken")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AppError::DuplicateEmail,
            StoreError::NotFound => AppError::NotFound,
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

/// Persistence for user rows. Email uniqueness is enforced here, not by callers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, name: &str, email: &str, password_hash: &str)
        -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn update_profile(&self, id: Uuid, name: &str, email: &str)
        -> Result<User, StoreError>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<User, StoreError>;
    async fn update_avatar(&self, id: Uuid, avatar_path: &str) -> Result<User, StoreError>;
    async fn list(&self, page: PageRequest) -> anyhow::Result<Page<User>>;
    /// Case-insensitive substring match on name or email.
    async fn search(&self, query: &str, page: PageRequest) -> anyhow::Result<Page<User>>;
}

/// Escape LIKE wildcards in user input and wrap it for a substring match.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for ch in query.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn write_error(e: sqlx::Error, what: &'static str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        sqlx::Error::RowNotFound => StoreError::NotFound,
        _ => StoreError::Other(anyhow::Error::new(e).context(what)),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, avatar_path, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| write_error(e, "insert user"))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, avatar_path, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, avatar_path, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, name: &str, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = $2, email = $3, updated_at = now()
             WHERE id = $1
            RETURNING id, name, email, password_hash, avatar_path, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_one(&self.db)
        .await
        .map_err(|e| write_error(e, "update profile"))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET password_hash = $2, updated_at = now()
             WHERE id = $1
            RETURNING id, name, email, password_hash, avatar_path, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| write_error(e, "update password"))
    }

    async fn update_avatar(&self, id: Uuid, avatar_path: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET avatar_path = $2, updated_at = now()
             WHERE id = $1
            RETURNING id, name, email, password_hash, avatar_path, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(avatar_path)
        .fetch_one(&self.db)
        .await
        .map_err(|e| write_error(e, "update avatar"))
    }

    async fn list(&self, page: PageRequest) -> anyhow::Result<Page<User>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        let items = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, avatar_path, created_at, updated_at
            FROM users
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .context("list users")?;

        Ok(Page { items, total, request: page })
    }

    async fn search(&self, query: &str, page: PageRequest) -> anyhow::Result<Page<User>> {
        let pattern = like_pattern(query);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
             WHERE name ILIKE $1 ESCAPE '\' OR email ILIKE $1 ESCAPE '\'
            "#,
        )
        .bind(&pattern)
        .fetch_one(&self.db)
        .await
        .context("count user search")?;

        let items = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, avatar_path, created_at, updated_at
            FROM users
            WHERE name ILIKE $1 ESCAPE '\' OR email ILIKE $1 ESCAPE '\'
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.db)
        .await
        .context("search users")?;

        Ok(Page { items, total, request: page })
    }
}
