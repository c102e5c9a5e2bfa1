//! In-memory store used by service tests (and handy for quick demos).
//! Single mutex, so every operation is atomic the way a single SQLite
//! document update is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, CodeStore, ContactHandle, Conversation, ConversationStore, ConversationSummary,
    Identity, Message, Profile, Sender, StoreError, StoreResult, VerificationCode,
};

#[derive(Default)]
struct Inner {
    identities: Vec<Identity>,
    codes: Vec<(String, VerificationCode)>,
    conversations: Vec<Conversation>,
    next_message_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty conversation and return its id.
    pub fn add_conversation(&self, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner.lock().conversations.push(Conversation {
            id: id.clone(),
            name: name.to_string(),
            avatar: None,
            last_message: None,
            last_activity: None,
            unread: 0,
            messages: Vec::new(),
        });
        id
    }
}

fn matches_handle(identity: &Identity, handle: &ContactHandle) -> bool {
    let raw = handle.as_str();
    identity.phone.as_deref() == Some(raw) || identity.email.as_deref() == Some(raw)
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_handle(&self, handle: &ContactHandle) -> StoreResult<Option<Identity>> {
        let inner = self.inner.lock();
        Ok(inner
            .identities
            .iter()
            .find(|i| matches_handle(i, handle))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
        let inner = self.inner.lock();
        Ok(inner.identities.iter().find(|i| i.id == id).cloned())
    }

    async fn create_pending(&self, handle: &ContactHandle) -> StoreResult<Identity> {
        let mut inner = self.inner.lock();
        // Check-and-insert under one lock: racing creators converge
        if let Some(existing) = inner.identities.iter().find(|i| matches_handle(i, handle)) {
            return Ok(existing.clone());
        }
        let now = Utc::now().to_rfc3339();
        let (phone, email) = match handle {
            ContactHandle::Phone(p) => (Some(p.clone()), None),
            ContactHandle::Email(e) => (None, Some(e.clone())),
        };
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            phone,
            email,
            profile: Profile::Pending,
            verified: false,
            created_at: now.clone(),
            updated_at: now,
        };
        inner.identities.push(identity.clone());
        Ok(identity)
    }

    async fn promote(&self, id: &str, name: &str, password_hash: &str) -> StoreResult<Identity> {
        let mut inner = self.inner.lock();
        let identity = inner
            .identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::Backend(format!("identity {id} not found during promote")))?;
        if identity.is_pending() {
            identity.profile = Profile::Complete {
                name: name.to_string(),
                password_hash: password_hash.to_string(),
            };
            identity.verified = true;
            identity.updated_at = Utc::now().to_rfc3339();
        }
        Ok(identity.clone())
    }

    async fn mark_verified(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(identity) = inner.identities.iter_mut().find(|i| i.id == id) {
            identity.verified = true;
            identity.updated_at = Utc::now().to_rfc3339();
        }
        Ok(())
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn put(
        &self,
        identity_id: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.lock().codes.push((
            identity_id.to_string(),
            VerificationCode {
                code: code.to_string(),
                expires_at,
            },
        ));
        Ok(())
    }

    async fn codes_for(&self, identity_id: &str) -> StoreResult<Vec<VerificationCode>> {
        let inner = self.inner.lock();
        Ok(inner
            .codes
            .iter()
            .filter(|(owner, _)| owner == identity_id)
            .map(|(_, code)| code.clone())
            .collect())
    }

    async fn delete_all(&self, identity_id: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .codes
            .retain(|(owner, _)| owner != identity_id);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn list_summaries(&self) -> StoreResult<Vec<ConversationSummary>> {
        let inner = self.inner.lock();
        Ok(inner.conversations.iter().map(|c| c.summary()).collect())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let inner = self.inner.lock();
        Ok(inner.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn append(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> StoreResult<Option<Conversation>> {
        let mut inner = self.inner.lock();
        inner.next_message_id += 1;
        let message_id = inner.next_message_id;

        let Some(conversation) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        else {
            return Ok(None);
        };

        let sent_at = sent_at.to_rfc3339();
        conversation.messages.push(Message {
            id: message_id,
            conversation_id: conversation_id.to_string(),
            sender,
            text: text.to_string(),
            sent_at: sent_at.clone(),
        });
        conversation.last_message = Some(text.to_string());
        conversation.last_activity = Some(sent_at);

        Ok(Some(conversation.clone()))
    }
}
