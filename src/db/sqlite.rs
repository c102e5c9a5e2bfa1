use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::{
    AccountStore, CodeStore, ContactHandle, Conversation, ConversationStore, ConversationSummary,
    DbPool, Identity, IdentityRow, Message, MessageRow, Sender, StoreError, StoreResult,
    VerificationCode,
};

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &DbPool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("whisper.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<()> {
    info!("Running database migrations...");

    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    seed_demo_conversations(pool).await?;

    info!("Migrations completed");
    Ok(())
}

/// Seed starter conversation threads on an empty database.
///
/// There is no conversation-creation endpoint; a fresh install gets a couple
/// of demo threads so the chat list is not a dead end.
async fn seed_demo_conversations(pool: &DbPool) -> Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
        .fetch_one(pool)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    info!("Seeding demo conversations");

    let now = Utc::now().to_rfc3339();
    let threads: Vec<(&str, Option<&str>, &str)> = vec![
        ("Alice", Some("🦊"), "Hey! Welcome to Whisper 👋"),
        ("Bob", Some("🐻"), "Ping me when you're around."),
    ];

    for (name, avatar, greeting) in threads {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO conversations (id, name, avatar, last_message, last_activity, unread, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(avatar)
        .bind(greeting)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO messages (conversation_id, sender, text, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(Sender::Counterpart.as_str())
        .bind(greeting)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn parse_expiry(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("malformed expiry timestamp: {e}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

/// SQLite-backed implementation of all three stores.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn find_by_handle(&self, handle: &ContactHandle) -> StoreResult<Option<Identity>> {
        let row: Option<IdentityRow> =
            sqlx::query_as("SELECT * FROM identities WHERE phone = ?1 OR email = ?1")
                .bind(handle.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Identity::from))
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
        let row: Option<IdentityRow> = sqlx::query_as("SELECT * FROM identities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Identity::from))
    }

    async fn create_pending(&self, handle: &ContactHandle) -> StoreResult<Identity> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let (phone, email) = match handle {
            ContactHandle::Phone(p) => (Some(p.as_str()), None),
            ContactHandle::Email(e) => (None, Some(e.as_str())),
        };

        let result = sqlx::query(
            "INSERT INTO identities (id, phone, email, verified, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(phone)
        .bind(email)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self
                .find_by_id(&id)
                .await?
                .ok_or_else(|| StoreError::Backend("identity vanished after insert".to_string())),
            // Lost the uniqueness race on the handle: reuse the winner's row.
            Err(err) if is_unique_violation(&err) => self
                .find_by_handle(handle)
                .await?
                .ok_or(StoreError::Database(err)),
            Err(err) => Err(err.into()),
        }
    }

    async fn promote(&self, id: &str, name: &str, password_hash: &str) -> StoreResult<Identity> {
        let now = Utc::now().to_rfc3339();
        // Guarded on the pending state: a retry against an already-complete
        // identity must not overwrite the stored profile.
        sqlx::query(
            "UPDATE identities SET name = ?, password_hash = ?, verified = 1, updated_at = ? \
             WHERE id = ? AND name IS NULL",
        )
        .bind(name)
        .bind(password_hash)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("identity {id} not found during promote")))
    }

    async fn mark_verified(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE identities SET verified = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CodeStore for SqliteStore {
    async fn put(
        &self,
        identity_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO otp_codes (id, identity_id, code, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(identity_id)
        .bind(code)
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn codes_for(&self, identity_id: &str) -> StoreResult<Vec<VerificationCode>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT code, expires_at FROM otp_codes WHERE identity_id = ?")
                .bind(identity_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(code, expires_at)| {
                Ok(VerificationCode {
                    code,
                    expires_at: parse_expiry(&expires_at)?,
                })
            })
            .collect()
    }

    async fn delete_all(&self, identity_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM otp_codes WHERE identity_id = ?")
            .bind(identity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn list_summaries(&self) -> StoreResult<Vec<ConversationSummary>> {
        let summaries: Vec<ConversationSummary> = sqlx::query_as(
            "SELECT id, name, avatar, last_message, last_activity, unread FROM conversations \
             ORDER BY last_activity IS NULL, last_activity DESC, created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let summary: Option<ConversationSummary> = sqlx::query_as(
            "SELECT id, name, avatar, last_message, last_activity, unread \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(summary) = summary else {
            return Ok(None);
        };

        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM messages WHERE conversation_id = ? ORDER BY id ASC")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(Conversation {
            id: summary.id,
            name: summary.name,
            avatar: summary.avatar,
            last_message: summary.last_message,
            last_activity: summary.last_activity,
            unread: summary.unread,
            messages: rows.into_iter().map(Message::from).collect(),
        }))
    }

    async fn append(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Option<Conversation>> {
        let sent_at = sent_at.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO messages (conversation_id, sender, text, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(sender.as_str())
        .bind(text)
        .bind(&sent_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversations SET last_message = ?, last_activity = ? WHERE id = ?",
        )
        .bind(text)
        .bind(&sent_at)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        // Read back inside the transaction so the returned snapshot is the
        // one this append produced, not a later writer's.
        let summary: ConversationSummary = sqlx::query_as(
            "SELECT id, name, avatar, last_message, last_activity, unread \
             FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM messages WHERE conversation_id = ? ORDER BY id ASC")
                .bind(conversation_id)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Some(Conversation {
            id: summary.id,
            name: summary.name,
            avatar: summary.avatar,
            last_message: summary.last_message,
            last_activity: summary.last_activity,
            unread: summary.unread,
            messages: rows.into_iter().map(Message::from).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_pool() -> DbPool {
        // A single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .unwrap();
        execute_sql(&pool, include_str!("../../migrations/001_initial.sql"))
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_pending_converges_on_one_identity() {
        let store = SqliteStore::new(test_pool().await);
        let handle = ContactHandle::parse("+15551234567").unwrap();

        let first = store.create_pending(&handle).await.unwrap();
        // Second create hits the unique constraint and reuses the winner
        let second = store.create_pending(&handle).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.is_pending());
        assert_eq!(second.phone.as_deref(), Some("+15551234567"));
    }

    #[tokio::test]
    async fn test_email_handle_lands_in_email_column() {
        let store = SqliteStore::new(test_pool().await);
        let handle = ContactHandle::parse("ada@example.com").unwrap();

        let identity = store.create_pending(&handle).await.unwrap();
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(identity.phone, None);

        let found = store.find_by_handle(&handle).await.unwrap().unwrap();
        assert_eq!(found.id, identity.id);
    }

    #[tokio::test]
    async fn test_promote_is_guarded_on_pending_state() {
        let store = SqliteStore::new(test_pool().await);
        let handle = ContactHandle::parse("+1555").unwrap();
        let identity = store.create_pending(&handle).await.unwrap();

        let promoted = store.promote(&identity.id, "Ada", "hash-1").await.unwrap();
        assert_eq!(promoted.name(), Some("Ada"));
        assert!(promoted.verified);

        // A retried promotion must not overwrite the stored profile
        let retried = store
            .promote(&identity.id, "Mallory", "hash-2")
            .await
            .unwrap();
        assert_eq!(retried.name(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_codes_roundtrip_and_delete_all() {
        let store = SqliteStore::new(test_pool().await);
        let handle = ContactHandle::parse("+1555").unwrap();
        let identity = store.create_pending(&handle).await.unwrap();

        let expires = Utc::now() + Duration::minutes(5);
        store.put(&identity.id, "111111", expires).await.unwrap();
        store.put(&identity.id, "222222", expires).await.unwrap();

        let codes = store.codes_for(&identity.id).await.unwrap();
        assert_eq!(codes.len(), 2);

        store.delete_all(&identity.id).await.unwrap();
        assert!(store.codes_for(&identity.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_updates_summary_atomically() {
        let pool = test_pool().await;
        seed_demo_conversations(&pool).await.unwrap();
        let store = SqliteStore::new(pool);

        let summaries = store.list_summaries().await.unwrap();
        assert!(!summaries.is_empty());
        let id = summaries[0].id.clone();

        let updated = store
            .append(&id, Sender::Caller, "hello", Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.last_message.as_deref(), Some("hello"));
        let last = updated.messages.last().unwrap();
        assert_eq!(last.text, "hello");
        assert_eq!(last.sender, Sender::Caller);
        assert_eq!(updated.last_activity.as_deref(), Some(last.sent_at.as_str()));
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_is_none() {
        let store = SqliteStore::new(test_pool().await);
        let result = store
            .append("no-such-thread", Sender::Caller, "hi", Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let pool = test_pool().await;
        seed_demo_conversations(&pool).await.unwrap();
        let store = SqliteStore::new(pool.clone());
        let first = store.list_summaries().await.unwrap().len();

        seed_demo_conversations(&pool).await.unwrap();
        assert_eq!(store.list_summaries().await.unwrap().len(), first);
    }
}
