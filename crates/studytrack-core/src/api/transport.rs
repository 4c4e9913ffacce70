//! HTTP transport seam.
//!
//! The session manager and resource client speak in terms of [`ApiRequest`]
//! and [`ApiResponse`]; a [`Transport`] turns those into real HTTP calls.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::ApiError;

/// An outbound API call, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::POST, path).with_json(body)
    }

    pub fn put<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PUT, path).with_json(body)
    }

    pub fn patch<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PATCH, path).with_json(body)
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// Status and raw body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

/// Sends requests to the backend. Transport failures (connection refused,
/// timeouts) are `ApiError::Network`; any HTTP status, including errors, is
/// a successful send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// `reqwest`-backed transport with a fixed base URL and JSON default headers.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidRequest(format!("Bad path {}: {}", path, e)))
    }
}

/// Parse the base URL, making sure relative paths join beneath it.
fn normalize_base_url(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base).with_context(|| format!("Invalid base URL: {}", base_url))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url(&request.path)?;
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status = status, path = %request.path, "Received response");

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

    /// Scripted transport: answers every request with a handler and records
    /// what was sent. Yields once per call so concurrent callers interleave.
    pub struct FakeTransport {
        handler: Handler,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl FakeTransport {
        pub fn new(
            handler: impl Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().expect("requests lock").clone()
        }

        pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.path == path)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().expect("requests lock").push(request.clone());
            tokio::task::yield_now().await;
            (self.handler)(request)
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse::new(status, value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unencodable_body_is_invalid_request() {
        let mut body = std::collections::HashMap::new();
        body.insert((1, 2), "tuple keys have no JSON form");

        let err = ApiRequest::post("subject/", &body).expect_err("not encodable");

        assert!(matches!(err, ApiError::InvalidRequest(ref msg) if msg.contains("encode")));
    }

    #[test]
    fn test_normalize_base_url() {
        let base = normalize_base_url("http://127.0.0.1:8000").expect("valid url");
        assert_eq!(base.as_str(), "http://127.0.0.1:8000/");

        let nested = normalize_base_url("https://example.com/api").expect("valid url");
        assert_eq!(nested.join("login/").expect("join").as_str(), "https://example.com/api/login/");

        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_url_joins_relative_paths() {
        let transport = HttpTransport::new("http://127.0.0.1:8000/", Duration::from_secs(5))
            .expect("transport");
        assert_eq!(
            transport.url("token/refresh/").expect("url").as_str(),
            "http://127.0.0.1:8000/token/refresh/"
        );
        assert_eq!(
            transport.url("/subject/4/").expect("url").as_str(),
            "http://127.0.0.1:8000/subject/4/"
        );
    }

    #[test]
    fn test_request_builders() {
        let request = ApiRequest::post("login/", &json!({"username": "ada", "password": "pw"}))
            .expect("encodable body")
            .with_query("subject", 3);
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body, Some(json!({"username": "ada", "password": "pw"})));
        assert_eq!(request.query, vec![("subject".to_string(), "3".to_string())]);
        assert_eq!(request.bearer, None);

        let delete = ApiRequest::delete("subject/1/").with_bearer("tok");
        assert_eq!(delete.body, None);
        assert_eq!(delete.bearer.as_deref(), Some("tok"));
    }

    #[test]
    fn test_response_helpers() {
        let ok = ApiResponse::new(201, r#"{"id": 5}"#);
        assert!(ok.is_success());
        let value: serde_json::Value = ok.json().expect("json body");
        assert_eq!(value["id"], 5);

        let denied = ApiResponse::new(401, "");
        assert!(!denied.is_success());
        assert!(denied.is_unauthorized());
        assert!(matches!(denied.json::<serde_json::Value>(), Err(ApiError::InvalidResponse(_))));
    }
}
