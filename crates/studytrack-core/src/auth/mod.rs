//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: owns the credential pair, attaches it to outbound
//!   requests and silently refreshes the access token on a 401
//! - `CredentialStore`: persistent mirror of the pair (file, OS keychain, memory)
//! - `CredentialPair` / `UserSummary`: what the backend hands out at login
//!
//! The pair is read from the store once at startup and rewritten on every
//! change.

pub mod credentials;
pub mod error;
pub mod session;
pub mod store;
pub mod validation;

pub use credentials::{token_expiry, CredentialPair, UserSummary};
pub use error::AuthError;
pub use session::{
    Attempt, AttemptedRequest, NoopObserver, SessionManager, SessionObserver, SessionState,
};
pub use store::{CredentialStore, FileStore, KeyringStore, MemoryStore, STORAGE_KEY};
pub use validation::{validate_login, validate_registration};
