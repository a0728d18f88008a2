//! Account endpoints under `/api/auth`.
//!
//! Register, login and the LinkedIn callback all end the same way: a token pair
//! for API clients plus a session cookie for the browser. Register and login
//! return the pair in the body. The callback is a browser redirect, so its pair
//! waits in the session until the app collects it from
//! `POST /api/auth/linkedin/tokens`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use store::models::{AuthProvider, NewUser, ProfileUpdate, Role, TokenKind, User, UserInfo};
use store::StoreError;

use super::extract::CurrentUser;
use super::linkedin::LinkedInOAuth;
use super::password::{hash_password, validate_password, verify_password};
use super::session::MaybeSession;
use super::tokens::{self, TokenPair};
use crate::email::{self, EmailTemplate};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequestInput {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmInput {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserInfo,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Lowercased, trimmed email; rejects values without `@`.
pub fn normalize_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::bad_request("A valid email address is required")),
    }
}

pub async fn register_user(state: &AppState, input: RegisterInput) -> ApiResult<User> {
    let email = normalize_email(&input.email)?;
    validate_password(&input.password)?;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }

    let user = state
        .store
        .create_user(NewUser {
            email: email.clone(),
            name: name.to_string(),
            avatar_url: None,
            role: Role::Member,
            provider: AuthProvider::Local,
            provider_id: email.clone(),
            password_hash: Some(hash_password(&input.password)?),
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::Conflict("An account with this email already exists".into()),
            other => other.into(),
        })?;

    tracing::info!(user_id = %user.id, "registered");
    email::deliver(state, &user.email, EmailTemplate::Welcome { name: user.name.clone() }).await;
    Ok(user)
}

pub async fn authenticate_password(state: &AppState, input: &LoginInput) -> ApiResult<User> {
    let invalid = || ApiError::Unauthorized(INVALID_CREDENTIALS.into());
    let email = normalize_email(&input.email).map_err(|_| invalid())?;
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;
    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&input.password, hash)? {
        return Err(invalid());
    }
    Ok(user)
}

async fn sign_in(state: &AppState, session: &MaybeSession, user: User) -> ApiResult<AuthResponse> {
    let tokens = tokens::issue_pair(state, user.id).await?;
    session
        .sign_in(user.id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to set session: {e}")))?;
    Ok(AuthResponse {
        user: user.to_info(),
        tokens,
    })
}

pub async fn register(
    State(state): State<AppState>,
    session: MaybeSession,
    Json(input): Json<RegisterInput>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let user = register_user(&state, input).await?;
    let response = sign_in(&state, &session, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    session: MaybeSession,
    Json(input): Json<LoginInput>,
) -> ApiResult<Json<AuthResponse>> {
    let user = authenticate_password(&state, &input).await?;
    tracing::info!(user_id = %user.id, "login");
    sign_in(&state, &session, user).await.map(Json)
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshInput>,
) -> ApiResult<Json<AuthResponse>> {
    let (user, tokens) = tokens::refresh(&state, &input.refresh_token).await?;
    Ok(Json(AuthResponse {
        user: user.to_info(),
        tokens,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    session: MaybeSession,
    CurrentUser(user): CurrentUser,
) -> ApiResult<StatusCode> {
    tokens::revoke_all(&state, user.id).await?;
    session
        .sign_out()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to clear session: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserInfo> {
    Json(user.to_info())
}

pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(mut update): Json<ProfileUpdate>,
) -> ApiResult<Json<UserInfo>> {
    if let Some(name) = update.name.as_mut() {
        *name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
    }
    let user = state.store.update_profile(user.id, update, Utc::now()).await?;
    Ok(Json(user.to_info()))
}

/// Always answers 202 so the endpoint cannot be used to probe for accounts.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(input): Json<ResetRequestInput>,
) -> ApiResult<StatusCode> {
    let Ok(email) = normalize_email(&input.email) else {
        return Ok(StatusCode::ACCEPTED);
    };
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .filter(|u| u.provider == AuthProvider::Local);
    if let Some(user) = user {
        let secret = tokens::issue_password_reset(&state, user.id).await?;
        let reset_url = format!(
            "{}/reset-password?token={secret}",
            state.settings.server.app_base_url.trim_end_matches('/')
        );
        email::deliver(
            &state,
            &user.email,
            EmailTemplate::PasswordReset {
                name: user.name.clone(),
                reset_url,
                expires_minutes: state.settings.auth.password_reset_minutes,
            },
        )
        .await;
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(input): Json<ResetConfirmInput>,
) -> ApiResult<StatusCode> {
    validate_password(&input.password)?;
    let user = tokens::consume_password_reset(&state, &input.token).await?;
    let hash = hash_password(&input.password)?;
    state.store.set_password_hash(user.id, &hash, Utc::now()).await?;
    state
        .store
        .revoke_user_tokens(user.id, &[TokenKind::Access, TokenKind::Refresh])
        .await?;
    tracing::info!(user_id = %user.id, "password reset");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/auth/linkedin`: redirect to LinkedIn's consent screen.
pub async fn linkedin_start(State(state): State<AppState>) -> ApiResult<Redirect> {
    let oauth = LinkedInOAuth::new(&state)?;
    let url = oauth.generate_auth_url(&state).await?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// `GET /api/auth/linkedin/callback`: finish sign-in and return to the app.
pub async fn linkedin_callback(
    State(state): State<AppState>,
    session: MaybeSession,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let app = state.settings.server.app_base_url.trim_end_matches('/').to_string();
    let fail = |reason: &str| Redirect::to(&format!("{app}/login?error={reason}"));

    if let Some(error) = params.error {
        tracing::warn!("LinkedIn returned an error: {}", error);
        return fail("access_denied");
    }
    let Some(code) = params.code else {
        tracing::error!("LinkedIn callback missing code");
        return fail("missing_code");
    };
    let Some(csrf_state) = params.state else {
        tracing::error!("LinkedIn callback missing state");
        return fail("missing_state");
    };

    let oauth = match LinkedInOAuth::new(&state) {
        Ok(oauth) => oauth,
        Err(e) => {
            tracing::error!("Failed to create LinkedIn OAuth: {}", e);
            return fail("config_error");
        }
    };
    let user = match oauth.exchange_code(&state, &code, &csrf_state).await {
        Ok(user) if user.is_active() => user,
        Ok(_) => return fail("account_disabled"),
        Err(e) => {
            tracing::error!("LinkedIn OAuth error: {}", e);
            return fail("oauth_error");
        }
    };
    if let Err(e) = finish_oauth_sign_in(&state, &session, &user).await {
        tracing::error!("Failed to finish LinkedIn sign-in: {}", e);
        return fail("session_error");
    }
    Redirect::to(&format!("{app}/dashboard"))
}

/// Issue the pair for an OAuth sign-in and hold it in the session.
pub async fn finish_oauth_sign_in(state: &AppState, session: &MaybeSession, user: &User) -> ApiResult<TokenPair> {
    let tokens = tokens::issue_pair(state, user.id).await?;
    session
        .sign_in(user.id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to set session: {e}")))?;
    session
        .stash_tokens(&tokens)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to store tokens: {e}")))?;
    tracing::info!(user_id = %user.id, "OAuth sign-in");
    Ok(tokens)
}

/// Hand over the pair issued by the last OAuth callback of this session.
pub async fn collect_oauth_tokens(state: &AppState, session: &MaybeSession) -> ApiResult<AuthResponse> {
    let Some(user_id) = session.user_id().await else {
        return Err(ApiError::unauthorized());
    };
    let tokens = session
        .take_tokens()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read session: {e}")))?
        .ok_or_else(|| ApiError::Unauthorized("No pending sign-in".into()))?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .filter(User::is_active)
        .ok_or_else(ApiError::unauthorized)?;
    Ok(AuthResponse {
        user: user.to_info(),
        tokens,
    })
}

/// `POST /api/auth/linkedin/tokens`: one-time pickup of the callback's pair.
pub async fn linkedin_tokens(
    State(state): State<AppState>,
    session: MaybeSession,
) -> ApiResult<Json<AuthResponse>> {
    collect_oauth_tokens(&state, &session).await.map(Json)
}
