mod memory;
mod models;
mod sqlite;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::{init, SqliteStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type DbPool = sqlx::SqlitePool;

/// Failure inside a store backend. Expected conditions (absent identity,
/// absent conversation, lost uniqueness races) are modeled in the trait
/// signatures, not here.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable mapping of verified/unverified identities.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_handle(&self, handle: &ContactHandle) -> StoreResult<Option<Identity>>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>>;

    /// Create a pending identity bound to `handle`. Racing creators for the
    /// same handle must converge: the loser of the uniqueness race re-reads
    /// and returns the winner's identity instead of erroring.
    async fn create_pending(&self, handle: &ContactHandle) -> StoreResult<Identity>;

    /// Promote a pending identity to complete, setting verified. The update
    /// is guarded on the stored pending state, so a retried promotion of an
    /// already-complete identity changes nothing; the current row is
    /// returned either way.
    async fn promote(&self, id: &str, name: &str, password_hash: &str) -> StoreResult<Identity>;

    async fn mark_verified(&self, id: &str) -> StoreResult<()>;
}

/// Durable mapping of pending verification codes to identities.
#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn put(
        &self,
        identity_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Every outstanding code for the identity, expired ones included;
    /// matching and expiry checks belong to the verification service.
    async fn codes_for(&self, identity_id: &str) -> StoreResult<Vec<VerificationCode>>;

    async fn delete_all(&self, identity_id: &str) -> StoreResult<()>;
}

/// Durable, ordered message log per conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list_summaries(&self) -> StoreResult<Vec<ConversationSummary>>;

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>>;

    /// Append a message and refresh the cached last-message summary as one
    /// atomic unit. Returns `None` when the conversation does not exist.
    async fn append(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Option<Conversation>>;
}

/// The store handles injected into the services, constructed once at
/// process start.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub codes: Arc<dyn CodeStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Stores {
    pub fn sqlite(pool: DbPool) -> Self {
        let store = Arc::new(SqliteStore::new(pool));
        Self {
            accounts: store.clone(),
            codes: store.clone(),
            conversations: store,
        }
    }

    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            accounts: store.clone(),
            codes: store.clone(),
            conversations: store,
        }
    }
}
