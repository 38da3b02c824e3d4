//! Registration, login, and the bearer-token extractor.

use super::{extract, ApiError, ApiResult, SharedState};
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use medrec_core::{AccessToken, AuthError, NewUser, Session, User};
use serde::Deserialize;

/// OAuth2 password-grant form fields
#[derive(Deserialize)]
pub(super) struct LoginForm {
    /// Username or email
    username: String,
    password: String,
}

pub(super) async fn register(
    State(state): State<SharedState>,
    extract::Json(new_user): extract::Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    tracing::info!("Registering user {:?}", new_user.username);
    let user = state.users.register(&new_user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub(super) async fn token(
    State(state): State<SharedState>,
    extract::Form(form): extract::Form<LoginForm>,
) -> ApiResult<Json<AccessToken>> {
    let token = state.sessions.login(&form.username, &form.password).await?;
    Ok(Json(token))
}

/// A request whose bearer token verified; rejects with 401 otherwise
#[derive(Clone, Debug)]
pub struct AuthSession(pub Session);

impl FromRequestParts<SharedState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| AuthError::MalformedHeader)?),
            None => None,
        };
        let session = state.sessions.authorize(header)?;
        tracing::debug!("Authorized request for {:?}", session.username);
        Ok(AuthSession(session))
    }
}
