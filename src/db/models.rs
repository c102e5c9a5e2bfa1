use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A phone number or email address used to request a verification code.
///
/// The caller picks one canonical form; the only normalization applied
/// here is whitespace trimming. Anything containing `@` is treated as an
/// email, everything else as a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactHandle {
    Phone(String),
    Email(String),
}

impl ContactHandle {
    /// Returns `None` for an empty (after trimming) handle.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.contains('@') {
            Some(Self::Email(trimmed.to_string()))
        } else {
            Some(Self::Phone(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Phone(s) | Self::Email(s) => s,
        }
    }
}

/// Profile state of an identity.
///
/// An identity starts out pending (no name, no password) the first time a
/// handle requests a code, and is promoted exactly once, on the first
/// successful verification that supplies a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    Pending,
    Complete { name: String, password_hash: String },
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub profile: Profile,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Identity {
    pub fn is_pending(&self) -> bool {
        matches!(self.profile, Profile::Pending)
    }

    pub fn name(&self) -> Option<&str> {
        match &self.profile {
            Profile::Pending => None,
            Profile::Complete { name, .. } => Some(name),
        }
    }
}

/// Row shape of the `identities` table. Profile fields are nullable in
/// storage; `Identity` folds them back into the tagged `Profile` union so
/// nothing downstream has to null-check them.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub verified: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        let profile = match (row.name, row.password_hash) {
            (Some(name), Some(password_hash)) => Profile::Complete {
                name,
                password_hash,
            },
            _ => Profile::Pending,
        };
        Self {
            id: row.id,
            phone: row.phone,
            email: row.email,
            profile,
            verified: row.verified != 0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// An outstanding verification code. Expiry is absolute; validation always
/// re-checks it against the current time rather than trusting the store to
/// have garbage-collected in time.
#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Caller,
    Counterpart,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Counterpart => "counterpart",
        }
    }
}

impl From<String> for Sender {
    fn from(s: String) -> Self {
        match s.as_str() {
            "caller" => Self::Caller,
            _ => Self::Counterpart,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub sender: Sender,
    pub text: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    pub sent_at: String,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender: Sender::from(row.sender),
            text: row.text,
            sent_at: row.sent_at,
        }
    }
}

/// Conversation header as returned by the chat list: everything except the
/// message log itself.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_activity: Option<String>,
    pub unread: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub last_message: Option<String>,
    pub last_activity: Option<String>,
    pub unread: i64,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            last_message: self.last_message.clone(),
            last_activity: self.last_activity.clone(),
            unread: self.unread,
        }
    }
}

// DTOs for API

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub verified: bool,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            name: identity.name().map(str::to_string),
            id: identity.id,
            phone: identity.phone,
            email: identity.email,
            verified: identity.verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_handle_parse() {
        assert_eq!(
            ContactHandle::parse("  +15551234567 "),
            Some(ContactHandle::Phone("+15551234567".to_string()))
        );
        assert_eq!(
            ContactHandle::parse("ada@example.com"),
            Some(ContactHandle::Email("ada@example.com".to_string()))
        );
        assert_eq!(ContactHandle::parse("   "), None);
        assert_eq!(ContactHandle::parse(""), None);
    }

    #[test]
    fn test_identity_row_folds_profile() {
        let row = IdentityRow {
            id: "i1".to_string(),
            phone: Some("+1555".to_string()),
            email: None,
            name: None,
            password_hash: None,
            verified: 0,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let identity = Identity::from(row.clone());
        assert!(identity.is_pending());
        assert_eq!(identity.name(), None);

        let complete = IdentityRow {
            name: Some("Ada".to_string()),
            password_hash: Some("hash".to_string()),
            verified: 1,
            ..row
        };
        let identity = Identity::from(complete);
        assert!(!identity.is_pending());
        assert_eq!(identity.name(), Some("Ada"));
        assert!(identity.verified);
    }
}
