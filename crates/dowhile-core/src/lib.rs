//! Core library for dowhile.
//!
//! Signs a user in to the DoWhile backend with GitHub OAuth, keeps the
//! session token in persistent storage and attaches it to every API call.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, CredentialSlot};
pub use auth::{AuthSession, SessionHandle, SessionState};
pub use config::Config;
pub use models::User;
