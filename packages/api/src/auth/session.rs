//! Browser session access.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tower_sessions::Session;
use uuid::Uuid;

use super::tokens::TokenPair;

/// Key for storing user ID in session.
pub const SESSION_USER_ID_KEY: &str = "user_id";

/// Token pair issued by an OAuth callback, held until the app collects it.
pub const PENDING_TOKENS_KEY: &str = "pending_tokens";

/// The request's session, if a session layer is installed.
///
/// API clients that only use bearer tokens may run without the layer (tests do),
/// so handlers treat a missing session as "no session" rather than failing.
pub struct MaybeSession(pub Option<Session>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

impl MaybeSession {
    pub fn from_parts(parts: &Parts) -> Self {
        Self(parts.extensions.get::<Session>().cloned())
    }

    /// User id stored in the session, ignoring unreadable sessions.
    pub async fn user_id(&self) -> Option<Uuid> {
        let session = self.0.as_ref()?;
        match session.get::<String>(SESSION_USER_ID_KEY).await {
            Ok(value) => value.and_then(|id| Uuid::parse_str(&id).ok()),
            Err(e) => {
                tracing::warn!("Failed to read session: {}", e);
                None
            }
        }
    }

    /// Bind the session to a user, rotating the session id.
    pub async fn sign_in(&self, user_id: Uuid) -> Result<(), tower_sessions::session::Error> {
        if let Some(session) = &self.0 {
            session.cycle_id().await?;
            session.insert(SESSION_USER_ID_KEY, user_id.to_string()).await?;
        }
        Ok(())
    }

    /// Hold a token pair server-side until [`take_tokens`](Self::take_tokens).
    pub async fn stash_tokens(&self, tokens: &TokenPair) -> Result<(), tower_sessions::session::Error> {
        if let Some(session) = &self.0 {
            session.insert(PENDING_TOKENS_KEY, tokens).await?;
        }
        Ok(())
    }

    /// The stashed pair, removed so it can be collected only once.
    pub async fn take_tokens(&self) -> Result<Option<TokenPair>, tower_sessions::session::Error> {
        match &self.0 {
            Some(session) => session.remove::<TokenPair>(PENDING_TOKENS_KEY).await,
            None => Ok(None),
        }
    }

    pub async fn sign_out(&self) -> Result<(), tower_sessions::session::Error> {
        if let Some(session) = &self.0 {
            session.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower_sessions::MemoryStore;

    use super::*;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            token_type: "Bearer".into(),
            expires_in: 900,
        }
    }

    #[tokio::test]
    async fn test_stashed_tokens_are_taken_once() {
        let session = MaybeSession(Some(Session::new(None, Arc::new(MemoryStore::default()), None)));
        let user_id = Uuid::new_v4();
        session.sign_in(user_id).await.unwrap();
        session.stash_tokens(&pair()).await.unwrap();

        assert_eq!(session.user_id().await, Some(user_id));
        assert_eq!(session.take_tokens().await.unwrap(), Some(pair()));
        assert_eq!(session.take_tokens().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_layer_is_empty() {
        let session = MaybeSession(None);
        session.stash_tokens(&pair()).await.unwrap();
        assert_eq!(session.user_id().await, None);
        assert_eq!(session.take_tokens().await.unwrap(), None);
    }
}
