//! # Bearer tokens
//!
//! Access and refresh tokens are opaque: 32 random bytes, hex encoded. The
//! database only ever sees `sha256(secret)`, so a leaked table cannot be replayed.
//!
//! - Access tokens are short-lived and validated on every request.
//! - Refresh tokens are single use: [`refresh`] consumes the presented token
//!   before issuing a new pair.
//! - Password-reset tokens share the table and the hashing scheme.

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use store::models::{AuthToken, TokenKind, User};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Credentials returned by login, register and refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Generate a new random token secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest stored in place of the secret.
pub fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

async fn store_token(state: &AppState, user_id: Uuid, kind: TokenKind, ttl: Duration) -> ApiResult<String> {
    let secret = generate_secret();
    let now = Utc::now();
    state
        .store
        .insert_token(AuthToken {
            token_hash: hash_token(&secret),
            user_id,
            kind,
            expires_at: now + ttl,
            created_at: now,
        })
        .await?;
    Ok(secret)
}

/// Issue a fresh access/refresh pair for the user.
pub async fn issue_pair(state: &AppState, user_id: Uuid) -> ApiResult<TokenPair> {
    let access_ttl = Duration::minutes(state.settings.auth.access_token_minutes);
    let refresh_ttl = Duration::days(state.settings.auth.refresh_token_days);
    let access_token = store_token(state, user_id, TokenKind::Access, access_ttl).await?;
    let refresh_token = store_token(state, user_id, TokenKind::Refresh, refresh_ttl).await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: access_ttl.num_seconds(),
    })
}

/// Resolve an access token to its active user.
pub async fn authenticate(state: &AppState, access_token: &str) -> ApiResult<User> {
    let token = state
        .store
        .find_token(&hash_token(access_token), TokenKind::Access, Utc::now())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".into()))?;
    active_user(state, token.user_id).await
}

/// Exchange a refresh token for a new pair. The presented token is consumed.
pub async fn refresh(state: &AppState, refresh_token: &str) -> ApiResult<(User, TokenPair)> {
    let token = state
        .store
        .take_token(&hash_token(refresh_token), TokenKind::Refresh, Utc::now())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired refresh token".into()))?;
    let user = active_user(state, token.user_id).await?;
    let pair = issue_pair(state, user.id).await?;
    Ok((user, pair))
}

/// Revoke every access and refresh token of the user.
pub async fn revoke_all(state: &AppState, user_id: Uuid) -> ApiResult<u64> {
    Ok(state
        .store
        .revoke_user_tokens(user_id, &[TokenKind::Access, TokenKind::Refresh])
        .await?)
}

pub async fn issue_password_reset(state: &AppState, user_id: Uuid) -> ApiResult<String> {
    state
        .store
        .revoke_user_tokens(user_id, &[TokenKind::PasswordReset])
        .await?;
    let ttl = Duration::minutes(state.settings.auth.password_reset_minutes);
    store_token(state, user_id, TokenKind::PasswordReset, ttl).await
}

/// Consume a password-reset token and return its owner.
pub async fn consume_password_reset(state: &AppState, secret: &str) -> ApiResult<User> {
    let token = state
        .store
        .take_token(&hash_token(secret), TokenKind::PasswordReset, Utc::now())
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset link"))?;
    active_user(state, token.user_id).await
}

async fn active_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    state
        .store
        .find_user(user_id)
        .await?
        .filter(User::is_active)
        .ok_or_else(|| ApiError::Unauthorized("Account is not active".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_secret_shape_and_hash() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, generate_secret());
        assert_eq!(hash_token(&secret), hash_token(&secret));
        assert_ne!(hash_token(&secret), secret);
    }

    #[tokio::test]
    async fn test_refresh_tokens_are_single_use() {
        let state = testing::state();
        let user = testing::user(&state, "jarrah@example.org", store::models::Role::Member).await;
        let pair = issue_pair(&state, user.id).await.unwrap();

        assert_eq!(authenticate(&state, &pair.access_token).await.unwrap().id, user.id);

        let (_, next) = refresh(&state, &pair.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);
        assert!(matches!(
            refresh(&state, &pair.refresh_token).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(refresh(&state, &next.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_all_invalidates_access() {
        let state = testing::state();
        let user = testing::user(&state, "kirra@example.org", store::models::Role::Member).await;
        let pair = issue_pair(&state, user.id).await.unwrap();
        assert_eq!(revoke_all(&state, user.id).await.unwrap(), 2);
        assert!(authenticate(&state, &pair.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_deactivated_user_cannot_authenticate() {
        let state = testing::state();
        let user = testing::user(&state, "lowanna@example.org", store::models::Role::Member).await;
        let pair = issue_pair(&state, user.id).await.unwrap();
        state.store.deactivate_user(user.id, Utc::now()).await.unwrap();
        assert!(matches!(
            authenticate(&state, &pair.access_token).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
