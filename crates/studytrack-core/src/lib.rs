//! Core library for studytrack.
//!
//! - [`auth`]: session manager, credential pair, persistent stores
//! - [`api`]: HTTP transport and the resource client
//! - [`config`]: application configuration

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpTransport, Resource, Transport};
pub use auth::{AuthError, CredentialPair, SessionManager, SessionObserver, SessionState, UserSummary};
pub use config::{Config, CredentialBackend};
