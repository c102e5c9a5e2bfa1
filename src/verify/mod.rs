//! Verification service: issues time-boxed one-time codes for a contact
//! handle, validates them, and materializes accounts on first success.
//!
//! State machine per identity: unknown → pending (first code request) →
//! complete (first verification that supplies a profile). Complete
//! identities cycle through further request/verify pairs on re-login
//! without changing state.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::{AuthConfig, DeliveryConfig};
use crate::db::{AccountStore, CodeStore, ContactHandle, Identity, Profile, StoreError};
use crate::notify::{DispatchError, Dispatcher};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("a phone number or email is required")]
    MissingContact,
    #[error("invalid or expired code")]
    InvalidOrExpiredCode,
    #[error("a display name and a password of at least {min_password_len} characters are required to finish signing up")]
    ProfileRequired { min_password_len: usize },
    #[error("could not deliver the verification code")]
    Dispatch(#[source] DispatchError),
    #[error("password hashing failed")]
    Hash,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a cryptographically random 6-digit code
fn generate_code() -> String {
    let mut rng = rand::rng();
    let n: u32 = rng.random_range(100_000..1_000_000);
    n.to_string()
}

/// Profile data optionally supplied alongside a code submission. Required
/// only on the first successful verification of a pending identity.
#[derive(Debug, Default, Clone)]
pub struct ProfileInput {
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug)]
pub struct Verified {
    pub identity: Identity,
    pub is_new_account: bool,
}

#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    pub code_ttl: Duration,
    pub min_password_len: usize,
    pub fail_open: bool,
    pub dispatch_timeout: std::time::Duration,
}

impl VerifyPolicy {
    pub fn from_config(auth: &AuthConfig, delivery: &DeliveryConfig) -> Self {
        Self {
            code_ttl: Duration::minutes(auth.code_ttl_minutes),
            min_password_len: auth.min_password_len,
            fail_open: delivery.fail_open,
            dispatch_timeout: std::time::Duration::from_secs(delivery.dispatch_timeout),
        }
    }
}

pub struct VerificationService {
    accounts: Arc<dyn AccountStore>,
    codes: Arc<dyn CodeStore>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: VerifyPolicy,
}

impl VerificationService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        codes: Arc<dyn CodeStore>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: VerifyPolicy,
    ) -> Self {
        Self {
            accounts,
            codes,
            dispatcher,
            policy,
        }
    }

    /// Issue a verification code for a contact handle and return the bound
    /// identity's identifier. First contact creates a pending identity.
    ///
    /// Delivery is best-effort: under the fail-open policy a dispatcher
    /// failure or timeout is logged and the identifier is still returned,
    /// so dev/demo callers can read the code from the console dispatcher's
    /// log line.
    pub async fn request_code(&self, raw_contact: &str) -> Result<String, VerifyError> {
        let handle = ContactHandle::parse(raw_contact).ok_or(VerifyError::MissingContact)?;

        let identity = match self.accounts.find_by_handle(&handle).await? {
            Some(identity) => identity,
            None => self.accounts.create_pending(&handle).await?,
        };

        let code = generate_code();
        let ttl_minutes = self.policy.code_ttl.num_minutes();
        let expires_at = Utc::now() + self.policy.code_ttl;
        self.codes.put(&identity.id, &code, expires_at).await?;

        let body = format!(
            "Your verification code is {code}. It expires in {ttl_minutes} minutes."
        );
        let send = self.dispatcher.send(handle.as_str(), &body);
        match tokio::time::timeout(self.policy.dispatch_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(identity = %identity.id, error = %err, "Code delivery failed");
                if !self.policy.fail_open {
                    return Err(VerifyError::Dispatch(err));
                }
            }
            Err(_) => {
                warn!(identity = %identity.id, "Code delivery timed out");
                if !self.policy.fail_open {
                    return Err(VerifyError::Dispatch(DispatchError::Timeout));
                }
            }
        }

        Ok(identity.id)
    }

    /// Validate a submitted code and finish login or registration.
    ///
    /// On success every outstanding code for the identifier is deleted, not
    /// just the one consumed, so a code issued by an earlier resend cannot
    /// be replayed after a later one succeeds.
    pub async fn verify_code(
        &self,
        identifier: &str,
        submitted: &str,
        profile: ProfileInput,
    ) -> Result<Verified, VerifyError> {
        let now = Utc::now();
        let submitted = submitted.trim();

        // Expiry is checked here against the current time; the store's own
        // cleanup is never trusted.
        let mut matched = false;
        for candidate in self.codes.codes_for(identifier).await? {
            let same: bool = candidate
                .code
                .as_bytes()
                .ct_eq(submitted.as_bytes())
                .into();
            if same && candidate.expires_at > now {
                matched = true;
            }
        }
        if !matched {
            return Err(VerifyError::InvalidOrExpiredCode);
        }

        let identity = self
            .accounts
            .find_by_id(identifier)
            .await?
            .ok_or(VerifyError::InvalidOrExpiredCode)?;

        // The pending/complete state doubles as the idempotency guard: a
        // retry after a crash between promotion and code deletion lands in
        // the complete branch and does not re-hash the password.
        let (identity, is_new_account) = match &identity.profile {
            Profile::Pending => {
                let name = profile
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or(VerifyError::ProfileRequired {
                        min_password_len: self.policy.min_password_len,
                    })?;
                let password = profile
                    .password
                    .as_deref()
                    .filter(|p| p.len() >= self.policy.min_password_len)
                    .ok_or(VerifyError::ProfileRequired {
                        min_password_len: self.policy.min_password_len,
                    })?;

                let password_hash = hash_password(password).map_err(|_| VerifyError::Hash)?;
                let promoted = self.accounts.promote(identifier, name, &password_hash).await?;
                info!(identity = %identifier, "Registered new account");
                (promoted, true)
            }
            Profile::Complete { .. } => {
                self.accounts.mark_verified(identifier).await?;
                let mut identity = identity;
                identity.verified = true;
                info!(identity = %identifier, "Re-verified existing account");
                (identity, false)
            }
        };

        self.codes.delete_all(identifier).await?;

        Ok(Verified {
            identity,
            is_new_account,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct RecordingDispatcher {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn send(&self, to: &str, body: &str) -> Result<(), DispatchError> {
            self.sent.lock().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct FailingDispatcher;

    #[async_trait]
    impl Dispatcher for FailingDispatcher {
        async fn send(&self, _to: &str, _body: &str) -> Result<(), DispatchError> {
            Err(DispatchError::Gateway("simulated outage".to_string()))
        }
    }

    fn policy() -> VerifyPolicy {
        VerifyPolicy {
            code_ttl: Duration::minutes(5),
            min_password_len: 8,
            fail_open: true,
            dispatch_timeout: std::time::Duration::from_secs(1),
        }
    }

    fn service_with(
        store: Arc<MemoryStore>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: VerifyPolicy,
    ) -> VerificationService {
        VerificationService::new(store.clone(), store, dispatcher, policy)
    }

    async fn stored_code(store: &MemoryStore, identifier: &str) -> String {
        let codes = store.codes_for(identifier).await.unwrap();
        codes.last().unwrap().code.clone()
    }

    fn ada_profile() -> ProfileInput {
        ProfileInput {
            name: Some("Ada".to_string()),
            password: Some("secret123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_request_code_creates_pending_identity_and_delivers() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = RecordingDispatcher::new();
        let service = service_with(store.clone(), dispatcher.clone(), policy());

        let id = service.request_code("+15551234567").await.unwrap();

        let identity = store.find_by_id(&id).await.unwrap().unwrap();
        assert!(identity.is_pending());
        assert!(!identity.verified);

        let code = stored_code(&store, &id).await;
        assert_eq!(code.len(), 6);
        let sent = dispatcher.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15551234567");
        assert!(sent[0].1.contains(&code));
    }

    #[tokio::test]
    async fn test_request_code_rejects_empty_contact() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, RecordingDispatcher::new(), policy());

        assert!(matches!(
            service.request_code("   ").await,
            Err(VerifyError::MissingContact)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_yield_one_identifier() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, RecordingDispatcher::new(), policy());

        let (a, b) = tokio::join!(
            service.request_code("+15551234567"),
            service.request_code("+15551234567"),
        );
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_fail_open_returns_identifier_and_code_still_works() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), Arc::new(FailingDispatcher), policy());

        // Dispatcher is down, but the call still hands back an identifier
        let id = service.request_code("+15551234567").await.unwrap();

        // ...and the code read from the store still verifies
        let code = stored_code(&store, &id).await;
        let verified = service.verify_code(&id, &code, ada_profile()).await.unwrap();
        assert!(verified.is_new_account);
        assert!(verified.identity.verified);
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_dispatch_failure() {
        let store = Arc::new(MemoryStore::new());
        let mut policy = policy();
        policy.fail_open = false;
        let service = service_with(store, Arc::new(FailingDispatcher), policy);

        assert!(matches!(
            service.request_code("+15551234567").await,
            Err(VerifyError::Dispatch(_))
        ));
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        let id = service.request_code("+1555").await.unwrap();
        let code = stored_code(&store, &id).await;

        service.verify_code(&id, &code, ada_profile()).await.unwrap();

        // Re-submitting the consumed code must fail
        assert!(matches!(
            service.verify_code(&id, &code, ProfileInput::default()).await,
            Err(VerifyError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        let id = service.request_code("+1555").await.unwrap();
        // Replace the live code with one that expired a minute ago
        store.delete_all(&id).await.unwrap();
        store
            .put(&id, "123456", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();

        assert!(matches!(
            service.verify_code(&id, "123456", ada_profile()).await,
            Err(VerifyError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_wrong_code_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        let id = service.request_code("+1555").await.unwrap();
        let code = stored_code(&store, &id).await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(matches!(
            service.verify_code(&id, wrong, ada_profile()).await,
            Err(VerifyError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_pending_identity_requires_profile() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        let id = service.request_code("+1555").await.unwrap();
        let code = stored_code(&store, &id).await;

        // No profile at all
        assert!(matches!(
            service.verify_code(&id, &code, ProfileInput::default()).await,
            Err(VerifyError::ProfileRequired { .. })
        ));
        // Password below the minimum length
        let short = ProfileInput {
            name: Some("Ada".to_string()),
            password: Some("short".to_string()),
        };
        assert!(matches!(
            service.verify_code(&id, &code, short).await,
            Err(VerifyError::ProfileRequired { .. })
        ));

        // The rejections must not have consumed the code
        let verified = service.verify_code(&id, &code, ada_profile()).await.unwrap();
        assert!(verified.is_new_account);
        assert_eq!(verified.identity.name(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_reverification_skips_profile_and_is_not_new() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        let id = service.request_code("+1555").await.unwrap();
        let code = stored_code(&store, &id).await;
        service.verify_code(&id, &code, ada_profile()).await.unwrap();

        // Re-login: new code, no profile needed this time
        let id2 = service.request_code("+1555").await.unwrap();
        assert_eq!(id, id2);
        let code = stored_code(&store, &id).await;
        let verified = service
            .verify_code(&id, &code, ProfileInput::default())
            .await
            .unwrap();
        assert!(!verified.is_new_account);
        assert_eq!(verified.identity.name(), Some("Ada"));
        assert!(verified.identity.verified);
    }

    #[tokio::test]
    async fn test_success_invalidates_every_outstanding_code() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), RecordingDispatcher::new(), policy());

        // Resend: two codes outstanding for the same identifier
        let id = service.request_code("+1555").await.unwrap();
        let first = stored_code(&store, &id).await;
        service.request_code("+1555").await.unwrap();
        let second = stored_code(&store, &id).await;

        // Either outstanding code is good...
        service.verify_code(&id, &first, ada_profile()).await.unwrap();

        // ...but success burns them all, including the unconsumed resend
        assert!(matches!(
            service
                .verify_code(&id, &second, ProfileInput::default())
                .await,
            Err(VerifyError::InvalidOrExpiredCode)
        ));
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_invalid_code() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, RecordingDispatcher::new(), policy());

        assert!(matches!(
            service
                .verify_code("no-such-identity", "123456", ProfileInput::default())
                .await,
            Err(VerifyError::InvalidOrExpiredCode)
        ));
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("secret124", &hash));
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
