//! API client for communicating with the DoWhile backend.
//!
//! This module provides the `ApiClient` struct for exchanging GitHub OAuth
//! codes for session tokens and fetching the authenticated profile.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::Url;

use crate::models::{AuthResponse, User};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Endpoint exchanging a GitHub OAuth code for a session token
const AUTHENTICATE_PATH: &str = "authenticate";

/// Endpoint returning the profile for the current bearer token
const PROFILE_PATH: &str = "profile";

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    code: &'a str,
}

/// Bearer token shared between the session manager and every `ApiClient`
/// clone. Read at send time, so updates apply to all later requests.
#[derive(Debug, Clone, Default)]
pub struct CredentialSlot {
    inner: Arc<RwLock<Option<String>>>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// API client for the DoWhile backend.
/// Clone is cheap - reqwest::Client and the credential slot are both Arc-backed.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: CredentialSlot,
}

impl ApiClient {
    /// Create a new API client talking to `base_url`
    pub fn new(base_url: &str, credential: CredentialSlot) -> Result<Self, ApiError> {
        // Reject malformed base URLs up front rather than on first request
        Url::parse(base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Credential slot consulted on every request
    pub fn credential(&self) -> &CredentialSlot {
        &self.credential
    }

    /// Exchange a GitHub OAuth code for a session token and profile
    pub async fn authenticate(&self, code: &str) -> Result<AuthResponse, ApiError> {
        self.post(AUTHENTICATE_PATH, &AuthenticateRequest { code }).await
    }

    /// Fetch the profile belonging to the current credential
    pub async fn profile(&self) -> Result<User, ApiError> {
        self.get(PROFILE_PATH).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.credential.get() {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidResponse("Stored token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        debug!(url = %url, authenticated = self.credential.is_set(), "GET");

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        debug!(url = %url, authenticated = self.credential.is_set(), "POST");

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }
}
