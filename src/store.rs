use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_CONTENT_LENGTH: usize = 2000;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub discussion_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only log of discussion chat messages. No update or delete entry
/// points exist: a stored message is immutable.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        discussion_id: &str,
        sender_id: &str,
        sender_username: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Newest-first page of messages plus the discussion's total count.
    /// Callers wanting chronological display reverse the page themselves.
    async fn list_page(
        &self,
        discussion_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<StoredMessage>, u64), StoreError>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // A single connection keeps sqlite's writes serialized and makes
        // in-memory databases coherent across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS discussion_messages (
                id TEXT PRIMARY KEY,
                discussion_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_username TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_discussion_messages_room_created
                ON discussion_messages (discussion_id, created_at DESC)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(SqliteStore { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(
        &self,
        discussion_id: &str,
        sender_id: &str,
        sender_username: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            discussion_id: discussion_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_username: sender_username.to_string(),
            content: content.trim().to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO discussion_messages
                (id, discussion_id, sender_id, sender_username, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.discussion_id)
        .bind(&message.sender_id)
        .bind(&message.sender_username)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_page(
        &self,
        discussion_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<StoredMessage>, u64), StoreError> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(limit);

        let messages = sqlx::query_as::<_, StoredMessage>(
            r#"
            SELECT id, discussion_id, sender_id, sender_username, content, created_at
            FROM discussion_messages
            WHERE discussion_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(discussion_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM discussion_messages WHERE discussion_id = ?")
                .bind(discussion_id)
                .fetch_one(&self.pool)
                .await?;

        let total = u64::try_from(total).unwrap_or_default();
        Ok((messages, total))
    }
}
