//! Translation of core errors into HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use medrec_core::{AuthError, Error};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error response with a `{"detail": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, err.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Auth(auth) => auth.into(),
            Error::Validation(_)
            | Error::Conflict { .. }
            | Error::NoChange
            | Error::Hashing(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            Error::InvalidIdFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Invalid patient ID format")
            }
            Error::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            Error::TransientStore(ref reason) => {
                tracing::error!("Store unavailable: {}", reason);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
            }
            other => {
                tracing::error!("Unexpected error: {:?}", other);
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.detail }));
        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidIdFormat("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::Conflict {
                    entity: "patient",
                    field: "phone".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::NoChange, StatusCode::BAD_REQUEST),
            (Error::NotFound("Patient"), StatusCode::NOT_FOUND),
            (
                Error::Auth(AuthError::InvalidToken),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::TransientStore("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Config("missing".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_only_rejected_password_input_is_a_client_error() {
        let rejected = ApiError::from(Error::Hashing("password must be at most 72 bytes".into()));
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let primitive = medrec_core::PasswordHasher::new(4)
            .unwrap()
            .check_password("pw", "$2b$04$truncated")
            .unwrap_err();
        let err = ApiError::from(primitive);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail(), "Internal server error");
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let err = ApiError::from(Error::Other("disk layout at /var/lib/secret".into()));
        assert_eq!(err.detail(), "Internal server error");
    }

    #[test]
    fn test_conflict_detail_names_field() {
        let err = ApiError::from(Error::Conflict {
            entity: "patient",
            field: "phone".into(),
        });
        assert_eq!(err.detail(), "A patient with this phone already exists");
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = ApiError::from(AuthError::MissingToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
