//! Request extractors for the authenticated caller.
//!
//! [`CurrentUser`] checks `Authorization: Bearer <token>` first and falls back to
//! the browser session. Deactivated accounts are rejected like unknown ones.
//! [`AdminUser`] additionally requires the `admin` role.

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use store::models::User;

use super::session::MaybeSession;
use super::tokens;
use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated, active user making the request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// An authenticated user with the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

/// Token from an `Authorization: Bearer` header, if present.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            return tokens::authenticate(state, token).await.map(Self);
        }

        let session = MaybeSession::from_parts(parts);
        let Some(user_id) = session.user_id().await else {
            return Err(ApiError::unauthorized());
        };

        let user = state
            .store
            .find_user(user_id)
            .await?
            .filter(User::is_active)
            .ok_or_else(ApiError::unauthorized)?;
        Ok(Self(user))
    }
}

/// `Option<CurrentUser>`: anonymous callers get `None`; other failures still reject.
impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>, Self::Rejection> {
        match <Self as FromRequestParts<AppState>>::from_request_parts(parts, state).await {
            Ok(user) => Ok(Some(user)),
            Err(ApiError::Unauthorized(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden());
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/auth/me");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc123"))), Some("abc123"));
        assert_eq!(bearer_token(&parts_with(Some("bearer abc123"))), Some("abc123"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc123"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }
}
