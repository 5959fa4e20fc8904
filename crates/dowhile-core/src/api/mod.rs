//! REST API client module for the DoWhile backend.
//!
//! This module provides the `ApiClient` used to exchange GitHub OAuth codes
//! for session tokens and to fetch the signed-in user's profile.
//!
//! Requests carry the bearer token held in a shared `CredentialSlot`, so
//! every client clone picks up sign-in and sign-out immediately.

pub mod client;
pub mod error;

pub use client::{ApiClient, CredentialSlot};
pub use error::ApiError;
