//! HTTP client that keeps the token store current.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::token_store::{TokenStore, Tokens};
use crate::auth::{AuthResponse, TokenPair};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(e) => e.status(),
            Self::Encode(_) => None,
            Self::Status { status, .. } => Some(*status),
        }
    }
}

/// Calls the `/api` surface with the stored access token.
///
/// A `401` triggers a single refresh with the stored refresh token followed by a
/// single retry of the original request. If the refresh fails the tokens are
/// cleared and the `401` is returned.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn store_pair(&self, pair: &TokenPair) {
        self.tokens.set(Tokens {
            access_token: pair.access_token.clone(),
            refresh_token: Some(pair.refresh_token.clone()),
        });
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let auth: AuthResponse = decode(response).await?;
        self.store_pair(&auth.tokens);
        Ok(auth)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.send(Method::POST, "/auth/logout", None).await;
        self.tokens.clear();
        result.map(|_| ())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        decode(self.send(Method::GET, path, None).await?).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let body = serde_json::to_value(body)?;
        decode(self.send(Method::POST, path, Some(body)).await?).await
    }

    /// Send with the current access token, refreshing once on `401`.
    pub async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response, ClientError> {
        let response = self.attempt(method.clone(), path, body.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !self.refresh().await? {
            return Ok(response);
        }
        Ok(self.attempt(method, path, body.as_ref()).await?)
    }

    async fn attempt(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response, reqwest::Error> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }

    /// Returns `false` when there was nothing to refresh with or the server refused.
    async fn refresh(&self) -> Result<bool, ClientError> {
        let Some(refresh_token) = self.tokens.get().and_then(|t| t.refresh_token) else {
            return Ok(false);
        };
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "token refresh rejected");
            self.tokens.clear();
            return Ok(false);
        }
        let auth: AuthResponse = response.json().await?;
        self.store_pair(&auth.tokens);
        Ok(true)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    Err(ClientError::Status { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use store::models::{Role, TokenKind, UserInfo};

    async fn serve(state: crate::AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::app(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_refreshes_once_on_unauthorized() {
        let state = testing::state();
        let user = testing::user(&state, "yindi@example.org", Role::Member).await;
        let client = ApiClient::new(serve(state.clone()).await, Arc::new(TokenStore::default()));

        client.login("yindi@example.org", testing::PASSWORD).await.unwrap();
        let first = client.tokens().get().unwrap();

        // Access tokens gone, refresh token still valid.
        state
            .store
            .revoke_user_tokens(user.id, &[TokenKind::Access])
            .await
            .unwrap();

        let me: UserInfo = client.get("/auth/me").await.unwrap();
        assert_eq!(me.id, user.id);
        assert_ne!(client.tokens().get().unwrap().access_token, first.access_token);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_tokens() {
        let state = testing::state();
        let user = testing::user(&state, "bindi@example.org", Role::Member).await;
        let client = ApiClient::new(serve(state.clone()).await, Arc::new(TokenStore::default()));

        client.login("bindi@example.org", testing::PASSWORD).await.unwrap();
        state.store.revoke_user_tokens(user.id, TokenKind::ALL).await.unwrap();

        let err = client.get::<UserInfo>("/auth/me").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(client.tokens().get().is_none());
    }
}
