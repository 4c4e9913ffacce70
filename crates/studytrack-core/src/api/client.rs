//! Resource client for the study-tracking REST API.
//!
//! Every call goes through [`SessionManager::send`], so requests carry the
//! current access token and recover once from an expired one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::SessionManager;

use super::{ApiError, ApiRequest, ApiResponse};

/// Backend collections, each exposing list/create/retrieve/update/delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Subject,
    StudySession,
    StudyProgress,
    StudyTip,
    UserProfile,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Subject,
        Resource::StudySession,
        Resource::StudyProgress,
        Resource::StudyTip,
        Resource::UserProfile,
    ];

    /// Collection path relative to the base URL
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Subject => "subject/",
            Resource::StudySession => "studysession/",
            Resource::StudyProgress => "studyprogress/",
            Resource::StudyTip => "studytip/",
            Resource::UserProfile => "userprofile/",
        }
    }

    pub fn item_path(&self, id: i64) -> String {
        format!("{}{}/", self.path(), id)
    }

    /// Whether the backend filters this collection by `?subject=`
    pub fn filters_by_subject(&self) -> bool {
        matches!(
            self,
            Resource::StudySession | Resource::StudyProgress | Resource::StudyTip
        )
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Subject => write!(f, "subjects"),
            Resource::StudySession => write!(f, "sessions"),
            Resource::StudyProgress => write!(f, "progress"),
            Resource::StudyTip => write!(f, "tips"),
            Resource::UserProfile => write!(f, "profile"),
        }
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "subject" | "subjects" => Ok(Resource::Subject),
            "session" | "sessions" | "studysession" => Ok(Resource::StudySession),
            "progress" | "studyprogress" => Ok(Resource::StudyProgress),
            "tip" | "tips" | "studytip" => Ok(Resource::StudyTip),
            "profile" | "userprofile" => Ok(Resource::UserProfile),
            other => Err(anyhow::anyhow!(
                "Unknown resource '{}' (expected subjects, sessions, progress, tips or profile)",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    suggestion: String,
}

/// API client for the study tracker.
/// Clone is cheap - the session manager is shared.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let description = format!("{} {}", request.method, request.path);
        let response = self
            .session
            .send(request)
            .await
            .with_context(|| format!("Failed to send {} request", description))?;
        debug!(request = %description, status = response.status, "Request completed");
        Self::check_response(response).with_context(|| format!("{} failed", description))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }

    // ===== CRUD =====

    /// List a collection, optionally narrowed to one subject
    pub async fn list<T: DeserializeOwned>(&self, resource: Resource, subject: Option<i64>) -> Result<Vec<T>> {
        let mut request = ApiRequest::get(resource.path());
        if let Some(subject_id) = subject {
            request = request.with_query("subject", subject_id);
        }
        self.fetch(request).await
    }

    pub async fn create<T: DeserializeOwned, B: Serialize>(&self, resource: Resource, body: &B) -> Result<T> {
        self.fetch(ApiRequest::post(resource.path(), body)?).await
    }

    pub async fn retrieve<T: DeserializeOwned>(&self, resource: Resource, id: i64) -> Result<T> {
        self.fetch(ApiRequest::get(resource.item_path(id))).await
    }

    pub async fn update<T: DeserializeOwned, B: Serialize>(&self, resource: Resource, id: i64, body: &B) -> Result<T> {
        self.fetch(ApiRequest::put(resource.item_path(id), body)?).await
    }

    /// Update only the given fields (the profile endpoint accepts an
    /// optional password this way)
    pub async fn partial_update<T: DeserializeOwned, B: Serialize>(
        &self,
        resource: Resource,
        id: i64,
        body: &B,
    ) -> Result<T> {
        self.fetch(ApiRequest::patch(resource.item_path(id), body)?).await
    }

    pub async fn delete(&self, resource: Resource, id: i64) -> Result<()> {
        self.execute(ApiRequest::delete(resource.item_path(id))).await?;
        Ok(())
    }

    // ===== Study tips =====

    /// Ask the backend to generate a study tip for a subject
    pub async fn study_suggestion(&self, subject_id: i64) -> Result<String> {
        let path = format!(
            "{}get_study_suggestion/",
            Resource::StudySession.item_path(subject_id)
        );
        let response: SuggestionResponse = self.fetch(ApiRequest::get(path)).await?;
        Ok(response.suggestion)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::api::testing::{json, FakeTransport};
    use crate::auth::{AuthError, CredentialPair, CredentialStore, MemoryStore, NoopObserver, UserSummary};

    fn logged_in_client(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
    ) -> (ApiClient, Arc<FakeTransport>) {
        let store = Arc::new(MemoryStore::new());
        store
            .save(&CredentialPair {
                access: "access-1".to_string(),
                refresh: "refresh-1".to_string(),
                user: UserSummary {
                    id: 1,
                    username: "ada".to_string(),
                    email: String::new(),
                    is_superuser: false,
                },
            })
            .expect("seed store");
        let transport = Arc::new(FakeTransport::new(handler));
        let session = SessionManager::init(store, transport.clone(), Arc::new(NoopObserver));
        (ApiClient::new(Arc::new(session)), transport)
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(Resource::Subject.path(), "subject/");
        assert_eq!(Resource::StudyProgress.item_path(12), "studyprogress/12/");
        assert!(Resource::StudyTip.filters_by_subject());
        assert!(!Resource::Subject.filters_by_subject());
    }

    #[test]
    fn test_resource_from_str() {
        for resource in Resource::ALL {
            let parsed: Resource = resource.to_string().parse().expect("display name parses");
            assert_eq!(parsed, resource);
        }
        assert_eq!("Sessions".parse::<Resource>().expect("case-insensitive"), Resource::StudySession);
        assert!("grades".parse::<Resource>().is_err());
    }

    #[tokio::test]
    async fn test_list_with_subject_filter() {
        let (client, transport) = logged_in_client(|_| {
            json(200, json!([{"id": 4, "subject": 2, "subject_name": "Chemistry", "duration_minutes": 45}]))
        });

        let sessions: Vec<Value> = client
            .list(Resource::StudySession, Some(2))
            .await
            .expect("list sessions");

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["subject_name"], "Chemistry");

        let sent = transport.requests();
        assert_eq!(sent[0].path, "studysession/");
        assert_eq!(sent[0].query, vec![("subject".to_string(), "2".to_string())]);
        assert_eq!(sent[0].bearer.as_deref(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let (client, transport) = logged_in_client(|req| {
            let mut body = req.body.clone().unwrap_or(Value::Null);
            body["id"] = json!(9);
            json(if req.method == reqwest::Method::POST { 201 } else { 200 }, body)
        });

        let created: Value = client
            .create(Resource::Subject, &json!({"subject_name": "Physics"}))
            .await
            .expect("create");
        assert_eq!(created["id"], 9);

        let updated: Value = client
            .update(Resource::Subject, 9, &json!({"subject_name": "Physics II"}))
            .await
            .expect("update");
        assert_eq!(updated["subject_name"], "Physics II");

        let sent = transport.requests();
        assert_eq!(sent[0].method, reqwest::Method::POST);
        assert_eq!(sent[0].path, "subject/");
        assert_eq!(sent[1].method, reqwest::Method::PUT);
        assert_eq!(sent[1].path, "subject/9/");
    }

    #[tokio::test]
    async fn test_partial_update_profile() {
        let (client, transport) = logged_in_client(|_| {
            json(200, json!({"id": 1, "username": "ada", "first_name": "Ada"}))
        });

        let profile: Value = client
            .partial_update(Resource::UserProfile, 1, &json!({"first_name": "Ada"}))
            .await
            .expect("patch profile");

        assert_eq!(profile["first_name"], "Ada");
        assert_eq!(transport.requests()[0].method, reqwest::Method::PATCH);
        assert_eq!(transport.requests()[0].path, "userprofile/1/");
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let (client, transport) = logged_in_client(|_| Ok(ApiResponse::new(204, "")));

        client.delete(Resource::StudyTip, 3).await.expect("delete");

        let sent = transport.requests();
        assert_eq!(sent[0].method, reqwest::Method::DELETE);
        assert_eq!(sent[0].path, "studytip/3/");
        assert_eq!(sent[0].body, None);
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let (client, _) = logged_in_client(|req| match req.path.as_str() {
            "subject/404/" => json(404, json!({"detail": "Not found."})),
            _ => json(400, json!({"subject_name": ["This field is required."]})),
        });

        let missing = client
            .retrieve::<Value>(Resource::Subject, 404)
            .await
            .expect_err("missing");
        assert!(matches!(missing.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))));

        let invalid = client
            .create::<Value, _>(Resource::Subject, &json!({}))
            .await
            .expect_err("invalid");
        assert!(matches!(invalid.downcast_ref::<ApiError>(), Some(ApiError::BadRequest(body)) if body.contains("required")));
    }

    #[tokio::test]
    async fn test_study_suggestion() {
        let (client, transport) = logged_in_client(|_| {
            json(200, json!({"suggestion": "Try shorter sessions in the morning."}))
        });

        let tip = client.study_suggestion(5).await.expect("suggestion");

        assert_eq!(tip, "Try shorter sessions in the morning.");
        assert_eq!(
            transport.requests()[0].path,
            "studysession/5/get_study_suggestion/"
        );
    }

    #[tokio::test]
    async fn test_expired_session_surfaces_refresh_failure() {
        let (client, _) = logged_in_client(|req| match req.path.as_str() {
            "token/refresh/" => json(401, json!({"detail": "Token is invalid or expired"})),
            _ => json(401, json!({"detail": "Given token not valid"})),
        });

        let err = client
            .list::<Value>(Resource::Subject, None)
            .await
            .expect_err("session expired");

        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Auth(AuthError::RefreshRejected(_)))
        ));
        assert!(!client.session().is_authenticated());
    }
}
