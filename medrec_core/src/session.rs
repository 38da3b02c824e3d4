//! Session gateway: bearer-token checks ahead of store access, and login.

use crate::credentials::TokenSigner;
use crate::users::UserStore;
use crate::{AuthError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BEARER: &str = "bearer";

/// An authenticated caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Token response returned by login
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
}

/// Token part of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> std::result::Result<&str, AuthError> {
    let (scheme, token) = header_value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return Err(AuthError::MalformedHeader);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Verifies presented tokens and issues new ones on login
#[derive(Clone, Debug)]
pub struct SessionGateway {
    signer: TokenSigner,
    users: UserStore,
}

impl SessionGateway {
    pub fn new(signer: TokenSigner, users: UserStore) -> Self {
        Self { signer, users }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Check the `Authorization` header of a request
    pub fn authorize(&self, header: Option<&str>) -> std::result::Result<Session, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let token = bearer_token(header)?;
        let claims = self
            .signer
            .verify_token(token)
            .ok_or(AuthError::InvalidToken)?;

        Ok(Session {
            expires_at: claims.expires_at(),
            username: claims.sub,
        })
    }

    /// Authenticate by username or email and issue a token for the username
    pub async fn login(&self, identifier: &str, password: &str) -> Result<AccessToken> {
        let user = self.users.authenticate(identifier, password).await?;
        let access_token = self.signer.issue_token(&user.username, None)?;
        tracing::info!("Issued access token for {:?}", user.username);

        Ok(AccessToken {
            access_token,
            token_type: BEARER.to_string(),
        })
    }
}
