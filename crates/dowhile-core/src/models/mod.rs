//! Data models shared with the DoWhile backend.
//!
//! - `User`: the authenticated GitHub profile
//! - `AuthResponse`: result of exchanging an OAuth code for a token

pub mod user;

pub use user::{AuthResponse, User};
