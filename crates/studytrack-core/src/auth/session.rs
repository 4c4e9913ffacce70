use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};

use super::{AuthError, CredentialPair, CredentialStore, UserSummary};

const LOGIN_PATH: &str = "login/";
const REGISTER_PATH: &str = "register/";
const REFRESH_PATH: &str = "token/refresh/";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    password: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// A request that could not be built never reached the backend.
fn request_error(err: ApiError) -> AuthError {
    match err {
        ApiError::InvalidRequest(message) => AuthError::InvalidRequest(message),
        other => AuthError::InvalidRequest(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// A silent refresh is in flight
    Refreshing,
}

/// Hooks for the front end: post-login navigation and the forced redirect to
/// the login entry point.
pub trait SessionObserver: Send + Sync {
    fn logged_in(&self, _user: &UserSummary) {}

    fn login_required(&self) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retry,
}

/// A request together with which attempt it is and the access token it was
/// last sent with.
#[derive(Debug, Clone)]
pub struct AttemptedRequest {
    pub request: ApiRequest,
    pub attempt: Attempt,
    sent_with: Option<String>,
}

impl AttemptedRequest {
    pub fn first(request: ApiRequest) -> Self {
        let sent_with = request.bearer.clone();
        Self {
            request,
            attempt: Attempt::First,
            sent_with,
        }
    }

    pub fn retry(request: ApiRequest) -> Self {
        Self::first(request).into_retry()
    }

    pub fn is_retry(&self) -> bool {
        self.attempt == Attempt::Retry
    }

    pub fn sent_with(&self) -> Option<&str> {
        self.sent_with.as_deref()
    }

    fn into_retry(self) -> Self {
        Self {
            attempt: Attempt::Retry,
            ..self
        }
    }
}

/// Owns the credential pair, mirrors it to a [`CredentialStore`], attaches it
/// to outbound requests and renews the access token when the backend
/// rejects it.
pub struct SessionManager {
    credentials: RwLock<Option<CredentialPair>>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SessionObserver>,
    refresh_lock: Mutex<()>,
    refreshing: AtomicBool,
}

impl SessionManager {
    /// Build a session manager, restoring any pair persisted by a previous
    /// process. No network call is made.
    pub fn init(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let credentials = match store.load() {
            Ok(Some(pair)) if pair.refresh_expired() => {
                info!(user = %pair.user.username, "Stored refresh token has expired, discarding session");
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear expired credentials");
                }
                None
            }
            Ok(Some(pair)) => {
                debug!(user = %pair.user.username, "Restored session from store");
                Some(pair)
            }
            Ok(None) => {
                debug!("No stored session found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored credentials");
                None
            }
        };

        Self {
            credentials: RwLock::new(credentials),
            store,
            transport,
            observer,
            refresh_lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
        }
    }

    // ===== State =====

    pub fn is_authenticated(&self) -> bool {
        self.read_credentials().is_some()
    }

    pub fn state(&self) -> SessionState {
        if self.refreshing.load(Ordering::SeqCst) {
            SessionState::Refreshing
        } else if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.read_credentials().clone()
    }

    pub fn user(&self) -> Option<UserSummary> {
        self.read_credentials().as_ref().map(|p| p.user.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_credentials().as_ref().map(|p| p.access.clone())
    }

    fn read_credentials(&self) -> RwLockReadGuard<'_, Option<CredentialPair>> {
        self.credentials.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_credentials(&self) -> RwLockWriteGuard<'_, Option<CredentialPair>> {
        self.credentials.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Login / Register / Logout =====

    /// Authenticate with the backend and start a session.
    ///
    /// On failure the current session (if any) and the store are untouched.
    pub async fn login(&self, username: &str, password: &str) -> Result<CredentialPair, AuthError> {
        let request = ApiRequest::post(LOGIN_PATH, &LoginRequest { username, password })
            .map_err(request_error)?;
        let pair = self.obtain_credentials(request).await?;
        self.start_session(pair)
    }

    /// Create an account and start a session with the credentials the
    /// backend returns for it.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<CredentialPair, AuthError> {
        let request = ApiRequest::post(
            REGISTER_PATH,
            &RegisterRequest {
                username,
                password,
                email,
            },
        )
        .map_err(request_error)?;
        let pair = self.obtain_credentials(request).await?;
        self.start_session(pair)
    }

    /// Forget the session in memory and in the store. Safe to call when
    /// already logged out.
    pub fn logout(&self) {
        let mut credentials = self.write_credentials();
        self.clear_locked(&mut credentials);
    }

    /// Clear memory and store while the caller holds the write guard, so a
    /// concurrent login can't land between the two.
    fn clear_locked(&self, credentials: &mut Option<CredentialPair>) {
        let previous = credentials.take();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        if let Some(pair) = previous {
            info!(user = %pair.user.username, "Logged out");
        }
    }

    async fn obtain_credentials(&self, request: ApiRequest) -> Result<CredentialPair, AuthError> {
        let request = self.attach_auth(request);
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;

        match response.status {
            200..=299 => response
                .json::<CredentialPair>()
                .map_err(|e| AuthError::InvalidResponse(e.to_string())),
            400 | 401 | 403 => Err(AuthError::InvalidCredentials(ApiError::truncate_body(
                &response.body,
            ))),
            status => Err(AuthError::UnexpectedStatus {
                status,
                body: ApiError::truncate_body(&response.body),
            }),
        }
    }

    /// Persist first, then publish in memory, so a failed write leaves the
    /// previous state intact.
    fn start_session(&self, pair: CredentialPair) -> Result<CredentialPair, AuthError> {
        {
            let mut credentials = self.write_credentials();
            self.store
                .save(&pair)
                .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;
            *credentials = Some(pair.clone());
        }
        info!(user = %pair.user.username, "Logged in");
        self.observer.logged_in(&pair.user);
        Ok(pair)
    }

    // ===== Request pipeline =====

    /// Set the bearer token to the current access token. Unauthenticated
    /// requests are returned unchanged.
    pub fn attach_auth(&self, request: ApiRequest) -> ApiRequest {
        match self.access_token() {
            Some(token) => request.with_bearer(token),
            None => request,
        }
    }

    /// Send a request with the current credentials, recovering once from a
    /// rejected access token.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(AttemptedRequest::first(request)).await
    }

    /// Recover from a 401: refresh the access token and re-issue `failed`.
    ///
    /// A request that is already a retry, or a 401 without a session,
    /// propagates `error` without refreshing. A request sent without the
    /// current access token is re-issued without refreshing. A failed
    /// refresh ends the session and propagates the refresh error.
    pub async fn handle_unauthorized(
        &self,
        failed: AttemptedRequest,
        error: ApiError,
    ) -> Result<ApiResponse, ApiError> {
        let retry = self.recover(failed, error).await?;
        self.dispatch(retry).await
    }

    async fn dispatch(&self, mut attempt: AttemptedRequest) -> Result<ApiResponse, ApiError> {
        loop {
            let response = self.issue(&mut attempt).await?;
            if !response.is_unauthorized() {
                return Ok(response);
            }
            attempt = self.recover(attempt, ApiError::Unauthorized).await?;
        }
    }

    async fn issue(&self, attempt: &mut AttemptedRequest) -> Result<ApiResponse, ApiError> {
        let request = self.attach_auth(attempt.request.clone());
        attempt.sent_with = request.bearer.clone();
        self.transport.send(&request).await
    }

    /// Decide what to do with a rejected request. Returns the attempt to
    /// re-issue, or the error to propagate.
    async fn recover(
        &self,
        failed: AttemptedRequest,
        error: ApiError,
    ) -> Result<AttemptedRequest, ApiError> {
        if failed.is_retry() {
            debug!(path = %failed.request.path, "Retried request rejected again, giving up");
            return Err(error);
        }
        if !self.is_authenticated() {
            self.redirect_to_login();
            return Err(error);
        }

        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.credentials() else {
            // Another request's refresh failed while we waited
            self.redirect_to_login();
            return Err(error);
        };

        // Sent without a token, or with one that has since been replaced:
        // the session changed under the request, so just resend it.
        if failed.sent_with() != Some(current.access.as_str()) {
            debug!(path = %failed.request.path, "Access token changed since request was sent, retrying");
            return Ok(failed.into_retry());
        }

        match self.refresh(&current).await {
            Ok(()) => Ok(failed.into_retry()),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.end_session(&current);
                self.redirect_to_login();
                Err(ApiError::Auth(e))
            }
        }
    }

    async fn refresh(&self, current: &CredentialPair) -> Result<(), AuthError> {
        self.refreshing.store(true, Ordering::SeqCst);
        let result = self.request_access_token(current).await;
        if let Ok(ref access) = result {
            self.replace_access(current, access.clone());
        }
        self.refreshing.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn request_access_token(&self, current: &CredentialPair) -> Result<String, AuthError> {
        let request = ApiRequest::post(
            REFRESH_PATH,
            &RefreshRequest {
                refresh: &current.refresh,
            },
        )
        .map_err(request_error)?;
        let request = self.attach_auth(request);

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::RefreshRejected(format!(
                "status {}: {}",
                response.status,
                ApiError::truncate_body(&response.body)
            )));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(body.access)
    }

    /// Swap in a new access token, unless the session changed (logout or a
    /// new login) while the refresh was in flight.
    fn replace_access(&self, current: &CredentialPair, access: String) {
        let mut credentials = self.write_credentials();
        let renewed = match credentials.as_ref() {
            Some(pair) if pair.refresh == current.refresh => pair.with_access(access),
            _ => {
                debug!("Session changed during refresh, discarding renewed token");
                return;
            }
        };

        if let Err(e) = self.store.save(&renewed) {
            warn!(error = %e, "Failed to persist refreshed credentials");
        }
        *credentials = Some(renewed);
        info!("Access token refreshed");
    }

    /// Log out, but only if `expired` is still the active session.
    fn end_session(&self, expired: &CredentialPair) {
        let mut credentials = self.write_credentials();
        let still_current = credentials
            .as_ref()
            .map(|pair| pair.refresh == expired.refresh)
            .unwrap_or(false);
        if still_current {
            self.clear_locked(&mut credentials);
        }
    }

    fn redirect_to_login(&self) {
        info!("Login required");
        self.observer.login_required();
    }
}
