use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::db::{Identity, IdentityResponse};
use crate::verify::ProfileInput;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestCodeRequest {
    pub contact: String,
}

#[derive(Debug, Serialize)]
pub struct RequestCodeResponse {
    pub identifier: String,
}

/// Request a verification code for a phone number or email.
///
/// POST /api/auth/request-code
pub async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RequestCodeRequest>,
) -> Result<Json<RequestCodeResponse>, ApiError> {
    let identifier = state.verification.request_code(&request.contact).await?;
    Ok(Json(RequestCodeResponse { identifier }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub identifier: String,
    pub code: String,
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub token: String,
    pub identity: IdentityResponse,
    pub is_new_account: bool,
}

/// Submit a code; finishes registration (with profile) or login, and mints
/// a session token.
///
/// POST /api/auth/verify-code
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, ApiError> {
    let profile = ProfileInput {
        name: request.name,
        password: request.password,
    };
    let verified = state
        .verification
        .verify_code(&request.identifier, &request.code, profile)
        .await?;

    let token = state.sessions.issue(&verified.identity.id)?;

    Ok(Json(VerifyCodeResponse {
        token,
        identity: IdentityResponse::from(verified.identity),
        is_new_account: verified.is_new_account,
    }))
}

/// Extractor for the authenticated identity: validates the bearer token and
/// loads the identity it names.
pub struct Auth(pub Identity);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::invalid_session("Missing bearer token"))?;

        let claims = state.sessions.validate(token)?;

        let identity = state
            .accounts
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::invalid_session("Unknown identity"))?;

        Ok(Auth(identity))
    }
}
