//! REST API module for the study-tracking backend.
//!
//! - `Transport` / `HttpTransport`: the HTTP seam, a `reqwest` client with a
//!   fixed base URL and JSON default headers
//! - `ApiClient`: CRUD over subjects, study sessions, progress, tips and the
//!   user profile, routed through the session manager
//!
//! Every resource endpoint requires a bearer access token, attached by
//! `SessionManager::attach_auth`.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, Resource};
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

#[cfg(test)]
pub(crate) use transport::testing;
