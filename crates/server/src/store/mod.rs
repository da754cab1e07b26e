//! Message Store Gateway
//!
//! Appends messages to durable storage and retrieves ordered history.
//! Messages are immutable once created; history is ascending by creation
//! time, the "recent N" windows used by the AI features are descending.

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::models::{Message, MessageSender};

type MessageRow = (
    String,         // id
    String,         // conversation_id
    String,         // sender_id
    String,         // text
    String,         // created_at
    Option<String>, // sender display_name
    Option<String>, // sender avatar_url
);

pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_db().await?;
        info!("[Store] Initialized");
        Ok(store)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id),
                FOREIGN KEY (sender_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a message and return it with the sender profile embedded.
    pub async fn append(
        &self,
        sender_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = db::now_timestamp();

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(text)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let sender: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT display_name, avatar_url FROM users WHERE id = ?")
                .bind(sender_id)
                .fetch_optional(&self.pool)
                .await?;

        let (display_name, avatar_url) =
            sender.ok_or_else(|| Error::NotFound("Sender not found".to_string()))?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender: MessageSender {
                id: sender_id.to_string(),
                display_name,
                avatar_url,
            },
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            created_at: db::parse_timestamp(&now)?,
        })
    }

    /// Full history for a conversation, ascending by creation time.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT m.id, m.conversation_id, m.sender_id, m.text, m.created_at, \
                    u.display_name, u.avatar_url \
             FROM messages m \
             JOIN users u ON u.id = m.sender_id \
             WHERE m.conversation_id = ? \
             ORDER BY m.created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    /// The `limit` most recent messages, newest first.
    pub async fn recent(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT m.id, m.conversation_id, m.sender_id, m.text, m.created_at, \
                    u.display_name, u.avatar_url \
             FROM messages m \
             JOIN users u ON u.id = m.sender_id \
             WHERE m.conversation_id = ? \
             ORDER BY m.created_at DESC \
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    /// The `limit` oldest messages, oldest first.
    pub async fn oldest(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT m.id, m.conversation_id, m.sender_id, m.text, m.created_at, \
                    u.display_name, u.avatar_url \
             FROM messages m \
             JOIN users u ON u.id = m.sender_id \
             WHERE m.conversation_id = ? \
             ORDER BY m.created_at ASC \
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }
}

fn row_to_message(
    (id, conversation_id, sender_id, text, created_at, display_name, avatar_url): MessageRow,
) -> Result<Message> {
    Ok(Message {
        id,
        conversation_id,
        sender: MessageSender {
            id: sender_id.clone(),
            display_name,
            avatar_url,
        },
        sender_id,
        text,
        created_at: db::parse_timestamp(&created_at)?,
    })
}
