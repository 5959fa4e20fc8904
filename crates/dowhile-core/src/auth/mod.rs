//! Authentication module for the GitHub sign-in session.
//!
//! This module provides:
//! - `AuthSession`: restores a stored session, completes OAuth callbacks,
//!   signs in and out
//! - `SessionHandle`: cloneable read-only view plus sign-out for consumers
//! - `CredentialStorage`: key-value persistence for the session token
//! - `History`: access to the front end's location for callback handling
//!
//! The token is persisted under `@dowhile:token` and never expires on its own.

pub mod callback;
pub mod session;
pub mod storage;

pub use callback::{extract_callback_code, History, MemoryHistory, OAuthCallback};
pub use session::{AuthError, AuthOperation, AuthSession, SessionHandle, SessionState, TOKEN_STORAGE_KEY};
pub use storage::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, StorageError};
