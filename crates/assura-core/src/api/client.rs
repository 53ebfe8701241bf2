//! Authenticated request gateway for the Assura backend.
//!
//! This module provides the `ApiClient` struct. Every request carries the
//! session's bearer token. When the backend answers 401 the client refreshes
//! the token once, shared by every request that failed in the meantime, and
//! replays those requests with the new token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::refresh::{RefreshCoordinator, Ticket};
use super::{ApiError, RefreshError};
use crate::auth::SessionStore;
use crate::config::Config;
use crate::models::{
    LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, TokenPair, UserProfile,
};
use crate::vault::{CredentialVault, VaultError};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";

const REFRESH_PATH: &str = "/auth/refresh";

/// A request the gateway can send, and send again after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// API client for the Assura backend.
/// Clone is cheap - clones share the connection pool, session and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    refresh_timeout: Duration,
    session: SessionStore,
    refresh: Arc<RefreshCoordinator>,
    vault: Option<Arc<CredentialVault>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_in_flight", &self.refresh.in_flight())
            .field("vault_sync", &self.vault.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Create a new API client on `session`
    pub fn new(config: &Config, session: SessionStore) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        debug!(base_url = %config.api_base_url, "Creating API client");

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            refresh_timeout: config.refresh_timeout(),
            session,
            refresh: Arc::new(RefreshCoordinator::default()),
            vault: None,
        })
    }

    /// Keep the vaulted token pair current after every successful refresh.
    pub fn with_vault_sync(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ===== Authentication =====

    /// Sign in with email and password, storing the returned tokens on the session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<UserProfile>, ApiError> {
        let response = self
            .client
            .post(self.build_url(LOGIN_PATH))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::InvalidCredentials);
        }
        let response = Self::check_response(response).await?;

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;

        let user = login.user.clone();
        self.session
            .login(login.user, TokenPair::new(login.token, login.refresh_token));
        info!("Signed in");
        Ok(user)
    }

    /// Sign out locally. The stored biometric credential is left alone.
    pub fn logout(&self) {
        self.session.logout();
        info!("Signed out");
    }

    // ===== Request pipeline =====

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.build_url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    /// Send `request` and return the backend's response.
    ///
    /// A 401 triggers one token refresh (shared with every other request that
    /// hits a 401 meanwhile) and a single replay. Whatever the replay returns,
    /// including another 401, is handed back as is. All other statuses pass
    /// through untouched.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let sent_with = self.session.access_token();
        let response = self.send(request, sent_with.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(method = %request.method, path = %request.path, "Request unauthorized");
        let token = self.recover_token(sent_with.as_deref()).await?;
        self.send(request, Some(&token)).await
    }

    async fn recover_token(&self, sent_with: Option<&str>) -> Result<String, ApiError> {
        loop {
            match self.refresh.begin(sent_with, || self.session.access_token()) {
                Ticket::Current(token) => {
                    debug!("Token already refreshed, replaying request");
                    return Ok(token);
                }
                Ticket::Wait(outcome) => {
                    debug!("Refresh in flight, queueing request");
                    match outcome.await.unwrap_or(Err(RefreshError::Abandoned)) {
                        Ok(tokens) => return Ok(tokens.access_token),
                        // The leader was dropped before touching the session
                        Err(RefreshError::Abandoned) => {
                            debug!("Refresh abandoned, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ticket::Lead(lease) => {
                    let outcome = self.refresh_session().await;
                    let released = lease.complete(outcome.clone());
                    debug!(released, "Released queued requests");

                    let tokens = outcome?;
                    self.sync_vault(&tokens).await;
                    return Ok(tokens.access_token);
                }
            }
        }
    }

    /// Exchange the refresh token, updating the session on success and
    /// signing out on failure.
    async fn refresh_session(&self) -> Result<TokenPair, RefreshError> {
        let Some(refresh_token) = self.session.refresh_token() else {
            warn!("Access token rejected and no refresh token available, signing out");
            self.session.logout();
            return Err(RefreshError::MissingRefreshToken);
        };

        info!("Access token expired, refreshing");
        let result = match tokio::time::timeout(
            self.refresh_timeout,
            self.request_refresh(&refresh_token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RefreshError::TimedOut(self.refresh_timeout)),
        };

        match result {
            Ok(tokens) => {
                self.session.set_tokens(tokens.clone());
                info!("Access token refreshed");
                Ok(tokens)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                self.session.logout();
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let response = self
            .client
            .post(self.build_url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: ApiError::truncate_body(&body),
            });
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        Ok(TokenPair {
            access_token: refreshed.token,
            // Backends that don't rotate refresh tokens omit it
            refresh_token: refreshed
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
        })
    }

    async fn sync_vault(&self, tokens: &TokenPair) {
        let Some(ref vault) = self.vault else {
            return;
        };
        match vault
            .update_token(&tokens.access_token, tokens.refresh_token.as_deref())
            .await
        {
            Ok(()) | Err(VaultError::NotEnabled) => {}
            Err(e) => warn!(error = %e, "Failed to update biometric credential after refresh"),
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    // ===== Typed helpers =====

    /// Execute `request` and decode a JSON body, mapping error statuses to `ApiError`.
    pub async fn request<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = Self::check_response(self.execute(request).await?).await?;
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                request.path, e
            ))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(&ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(&ApiRequest::post(path, body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(&ApiRequest::put(path, body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(&ApiRequest::delete(path)).await
    }

    /// POST where the backend answers without a body
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        Self::check_response(self.execute(&ApiRequest::post(path, body)?).await?).await?;
        Ok(())
    }
}
