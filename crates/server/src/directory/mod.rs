//! Conversation Directory
//!
//! Creates and looks up one-to-one and group conversations and enforces
//! membership invariants. A one-to-one conversation has exactly two
//! memberships and no title; the pair is kept unique by running the
//! lookup-then-create inside a single transaction.

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::auth::row_to_user;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{Conversation, GroupConversation, Member, Message, MessageSender, User, UserPublic};

/// Result of a group join attempt; joining twice is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
}

pub struct ConversationDirectory {
    pool: SqlitePool,
}

impl ConversationDirectory {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let directory = Self { pool };
        directory.init_db().await?;
        info!("[Directory] Initialized");
        Ok(directory)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                is_group INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memberships (
                user_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, conversation_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create (or return the existing) one-to-one conversation between two
    /// users. Idempotent: calling twice yields the same conversation.
    pub async fn create_one_to_one(&self, user_a: &str, user_b: &str) -> Result<Conversation> {
        if user_a == user_b {
            return Err(Error::InvalidInput(
                "Cannot start chat with yourself".to_string(),
            ));
        }

        // Lookup and insert share one transaction so concurrent callers
        // cannot both pass the duplicate check.
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT c.id FROM conversations c \
             JOIN memberships m1 ON m1.conversation_id = c.id AND m1.user_id = ? \
             JOIN memberships m2 ON m2.conversation_id = c.id AND m2.user_id = ? \
             WHERE c.is_group = 0 \
             LIMIT 1",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((id,)) = existing {
            tx.commit().await?;
            return self.get_by_id(&id).await;
        }

        let id = Uuid::new_v4().to_string();
        let now = db::now_timestamp();

        sqlx::query("INSERT INTO conversations (id, is_group, title, created_at) VALUES (?, 0, NULL, ?)")
            .bind(&id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        for user_id in [user_a, user_b] {
            sqlx::query(
                "INSERT INTO memberships (user_id, conversation_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(&id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("[Directory] One-to-one conversation created: {}", id);

        self.get_by_id(&id).await
    }

    /// Create a group conversation with one membership per listed user.
    /// No duplicate detection and no minimum member count.
    pub async fn create_group(&self, title: &str, member_ids: &[String]) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = db::now_timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO conversations (id, is_group, title, created_at) VALUES (?, 1, ?, ?)")
            .bind(&id)
            .bind(title)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        for user_id in member_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO memberships (user_id, conversation_id, created_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(&id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("[Directory] Group '{}' created: {}", title, id);

        self.get_by_id(&id).await
    }

    /// All conversations the user belongs to, most recently created first,
    /// each with member public profiles embedded.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows: Vec<(String, bool, Option<String>, String)> = sqlx::query_as(
            "SELECT c.id, c.is_group, c.title, c.created_at FROM conversations c \
             JOIN memberships m ON m.conversation_id = c.id \
             WHERE m.user_id = ? \
             ORDER BY c.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(self.hydrate(row).await?);
        }
        Ok(conversations)
    }

    /// All group conversations with their latest message, for discovery.
    pub async fn list_groups(&self) -> Result<Vec<GroupConversation>> {
        let rows: Vec<(String, bool, Option<String>, String)> = sqlx::query_as(
            "SELECT id, is_group, title, created_at FROM conversations \
             WHERE is_group = 1 \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let conversation = self.hydrate(row).await?;
            let last_message = self.last_message(&conversation.id).await?;
            groups.push(GroupConversation {
                conversation,
                last_message,
            });
        }
        Ok(groups)
    }

    /// Join a group conversation. `NotFound` when the conversation is
    /// missing or is not a group; joining twice is a no-op.
    pub async fn join_group(&self, user_id: &str, conversation_id: &str) -> Result<JoinOutcome> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT is_group FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((true,)) => {}
            _ => return Err(Error::NotFound("Group not found".to_string())),
        }

        if self.is_member(user_id, conversation_id).await? {
            return Ok(JoinOutcome::AlreadyMember);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO memberships (user_id, conversation_id, created_at) \
             VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(db::now_timestamp())
        .execute(&self.pool)
        .await?;

        info!("[Directory] User {} joined group {}", user_id, conversation_id);
        Ok(JoinOutcome::Joined)
    }

    pub async fn get_by_id(&self, conversation_id: &str) -> Result<Conversation> {
        let row: Option<(String, bool, Option<String>, String)> = sqlx::query_as(
            "SELECT id, is_group, title, created_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| Error::NotFound("Conversation not found".to_string()))?;
        self.hydrate(row).await
    }

    /// Membership probe used by the realtime layer before a room join.
    pub async fn is_member(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM memberships WHERE user_id = ? AND conversation_id = ?",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Resolve a chat partner from an email-or-display-name string: exact
    /// email match first, then case-insensitive display name. More than one
    /// name match is `Ambiguous` and the caller must disambiguate by email.
    pub async fn resolve_user(&self, input: &str) -> Result<User> {
        let by_email: Option<(String, String, String, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT id, email, password_hash, display_name, avatar_url, created_at \
                 FROM users WHERE email = ?",
            )
            .bind(input)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = by_email {
            return row_to_user(row);
        }

        let by_name: Vec<(String, String, String, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT id, email, password_hash, display_name, avatar_url, created_at \
                 FROM users WHERE display_name IS NOT NULL AND LOWER(display_name) = LOWER(?)",
            )
            .bind(input)
            .fetch_all(&self.pool)
            .await?;

        if by_name.len() > 1 {
            return Err(Error::Ambiguous(
                "Multiple users found with that name. Please use email.".to_string(),
            ));
        }

        match by_name.into_iter().next() {
            Some(row) => row_to_user(row),
            None => Err(Error::NotFound("No user found".to_string())),
        }
    }

    async fn hydrate(
        &self,
        (id, is_group, title, created_at): (String, bool, Option<String>, String),
    ) -> Result<Conversation> {
        let members = self.load_members(&id).await?;
        Ok(Conversation {
            id,
            is_group,
            title,
            created_at: db::parse_timestamp(&created_at)?,
            members,
        })
    }

    async fn load_members(&self, conversation_id: &str) -> Result<Vec<Member>> {
        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT m.user_id, m.conversation_id, u.display_name, u.email \
             FROM memberships m \
             JOIN users u ON u.id = m.user_id \
             WHERE m.conversation_id = ? \
             ORDER BY m.created_at",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, conversation_id, display_name, email)| Member {
                user: UserPublic {
                    id: user_id.clone(),
                    display_name,
                    email,
                },
                user_id,
                conversation_id,
            })
            .collect())
    }

    async fn last_message(&self, conversation_id: &str) -> Result<Option<Message>> {
        let row: Option<(String, String, String, String, String, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT m.id, m.conversation_id, m.sender_id, m.text, m.created_at, \
                        u.display_name, u.avatar_url \
                 FROM messages m \
                 JOIN users u ON u.id = m.sender_id \
                 WHERE m.conversation_id = ? \
                 ORDER BY m.created_at DESC \
                 LIMIT 1",
            )
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(
            |(id, conversation_id, sender_id, text, created_at, display_name, avatar_url)| {
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
            },
        )
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use tempfile::TempDir;

    async fn setup() -> (ConversationDirectory, AuthManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect(&dir.path().join("chat.sqlite")).await.unwrap();
        let auth = AuthManager::new(pool.clone(), "test-secret").await.unwrap();
        let directory = ConversationDirectory::new(pool).await.unwrap();
        (directory, auth, dir)
    }

    async fn register(auth: &AuthManager, email: &str, name: Option<&str>) -> User {
        let (_, user) = auth
            .register(
                email.to_string(),
                "pw123456".to_string(),
                name.map(str::to_string),
                None,
            )
            .await
            .unwrap();
        user
    }

    #[tokio::test]
    async fn test_one_to_one_create_is_idempotent() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", Some("A")).await;
        let b = register(&auth, "b@example.com", Some("B")).await;

        let first = directory.create_one_to_one(&a.id, &b.id).await.unwrap();
        let second = directory.create_one_to_one(&a.id, &b.id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(!first.is_group);
        assert!(first.title.is_none());
        assert_eq!(first.members.len(), 2);
    }

    #[tokio::test]
    async fn test_one_to_one_with_self_is_rejected() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;

        let err = directory.create_one_to_one(&a.id, &a.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_group_has_one_membership_per_member() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;
        let b = register(&auth, "b@example.com", None).await;
        let c = register(&auth, "c@example.com", None).await;

        let group = directory
            .create_group("Team", &[a.id, b.id, c.id])
            .await
            .unwrap();

        assert!(group.is_group);
        assert_eq!(group.title.as_deref(), Some("Team"));
        assert_eq!(group.members.len(), 3);
    }

    #[tokio::test]
    async fn test_join_group_is_idempotent() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;
        let d = register(&auth, "d@example.com", None).await;

        let group = directory.create_group("Team", &[a.id]).await.unwrap();

        assert_eq!(
            directory.join_group(&d.id, &group.id).await.unwrap(),
            JoinOutcome::Joined
        );
        assert_eq!(
            directory.join_group(&d.id, &group.id).await.unwrap(),
            JoinOutcome::AlreadyMember
        );

        let loaded = directory.get_by_id(&group.id).await.unwrap();
        assert_eq!(loaded.members.len(), 2);
    }

    #[tokio::test]
    async fn test_join_requires_an_existing_group() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;
        let b = register(&auth, "b@example.com", None).await;

        let err = directory.join_group(&a.id, "missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // One-to-one conversations are not joinable either.
        let chat = directory.create_one_to_one(&a.id, &b.id).await.unwrap();
        let err = directory.join_group(&a.id, &chat.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_for_user_most_recent_first() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;
        let b = register(&auth, "b@example.com", None).await;

        let older = directory
            .create_group("First", &[a.id.clone()])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = directory
            .create_group("Second", &[a.id.clone()])
            .await
            .unwrap();

        // b's conversation must not appear in a's list
        directory.create_group("Other", &[b.id]).await.unwrap();

        let listed = directory.list_for_user(&a.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn test_is_member() {
        let (directory, auth, _dir) = setup().await;
        let a = register(&auth, "a@example.com", None).await;
        let b = register(&auth, "b@example.com", None).await;

        let group = directory.create_group("Team", &[a.id.clone()]).await.unwrap();

        assert!(directory.is_member(&a.id, &group.id).await.unwrap());
        assert!(!directory.is_member(&b.id, &group.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_user_by_email_then_name() {
        let (directory, auth, _dir) = setup().await;
        let alice = register(&auth, "alice@example.com", Some("Alice")).await;
        register(&auth, "bob@example.com", Some("Bob")).await;

        let by_email = directory.resolve_user("alice@example.com").await.unwrap();
        assert_eq!(by_email.id, alice.id);

        let by_name = directory.resolve_user("ALICE").await.unwrap();
        assert_eq!(by_name.id, alice.id);

        let err = directory.resolve_user("nobody").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_user_ambiguous_name() {
        let (directory, auth, _dir) = setup().await;
        register(&auth, "sam1@example.com", Some("Sam")).await;
        register(&auth, "sam2@example.com", Some("sam")).await;

        let err = directory.resolve_user("Sam").await.unwrap_err();
        assert!(matches!(err, Error::Ambiguous(_)));
    }
}
