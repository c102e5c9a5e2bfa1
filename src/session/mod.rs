//! Stateless session credentials: HS256-signed tokens binding an identity
//! identifier to issuance/expiry timestamps. Nothing is stored server-side;
//! rotating the signing secret invalidates every outstanding session at
//! once, which is the only revocation mechanism.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// Signature checks out but the session is past its expiry; the client
    /// should be sent back through verification.
    #[error("session expired")]
    Expired,
    /// Malformed or tampered token.
    #[error("invalid session")]
    Invalid,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// The identity's opaque identifier
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &str, ttl_days: i64) -> Self {
        let mut validation = Validation::default();
        // Expiry is exact; no clock-drift leeway
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::days(ttl_days),
        }
    }

    /// Mint a signed session token for an identity.
    pub fn issue(&self, identity_id: &str) -> Result<String, SessionError> {
        self.issue_at(identity_id, Utc::now())
    }

    fn issue_at(&self, identity_id: &str, issued_at: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = Claims {
            sub: identity_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| SessionError::Invalid)
    }

    /// Verify signature and expiry, distinguishing the two failure modes so
    /// callers can prompt re-authentication rather than reject outright.
    pub fn validate(&self, token: &str) -> Result<Claims, SessionError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid,
            })
    }
}
