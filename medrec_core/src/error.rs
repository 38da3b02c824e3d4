//! Error types for the medrec_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a caller could not be authenticated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown identifier, wrong password, or inactive account
    #[error("Incorrect username/email or password")]
    InvalidCredentials,

    #[error("Not authenticated")]
    MissingToken,

    #[error("Authorization header must use the Bearer scheme")]
    MalformedHeader,

    /// Bad signature, expired, or unreadable token
    #[error("Could not validate credentials")]
    InvalidToken,
}

/// Core error type for medrec_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Identifier is not a well-formed internal id
    #[error("Invalid patient ID format: {0}")]
    InvalidIdFormat(String),

    /// Uniqueness violation reported by the store
    #[error("A {entity} with this {field} already exists")]
    Conflict { entity: &'static str, field: String },

    /// Update replaced a document with identical content
    #[error("No changes were made")]
    NoChange,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Configuration missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store unreachable; retried at startup
    #[error("Store unavailable: {0}")]
    TransientStore(String),

    /// Password the hashing primitive cannot take (too long, NUL byte)
    #[error("Password hashing error: {0}")]
    Hashing(String),

    /// Database error not covered by the variants above
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
