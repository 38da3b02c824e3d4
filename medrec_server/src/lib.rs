//! HTTP server and maintenance commands for the medrec backend.

pub mod api;

pub use api::{router, AppState, SharedState};
