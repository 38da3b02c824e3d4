#![forbid(unsafe_code)]

//! Core domain model and business logic for the medrec healthcare records backend.
//!
//! This crate provides:
//! - Domain types (users, patients, pages, tokens)
//! - Credential engine (bcrypt password hashing, HS256 session tokens)
//! - Identity store (registration, login lookup)
//! - Record store (patient CRUD, search, pagination, id reconciliation)
//! - Session gateway (bearer token checks)
//! - Database lifecycle (connect with retry, index provisioning, maintenance)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod credentials;
pub mod db;
pub mod users;
pub mod patients;
pub mod session;

// Re-export commonly used types
pub use error::{AuthError, Error, Result};
pub use types::*;
pub use config::Config;
pub use credentials::{PasswordHasher, TokenClaims, TokenSigner};
pub use db::{CollectionStats, Database, IndexReport};
pub use users::UserStore;
pub use patients::{ListQuery, PatientStore};
pub use session::{AccessToken, Session, SessionGateway};
