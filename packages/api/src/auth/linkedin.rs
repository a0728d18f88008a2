//! # LinkedIn sign-in (OpenID Connect over OAuth 2.0)
//!
//! Authorization Code flow with PKCE.
//!
//! 1. **[`generate_auth_url`](LinkedInOAuth::generate_auth_url)** builds an
//!    authorization URL requesting `openid`, `profile` and `email`, generates a
//!    PKCE challenge, and persists the CSRF state + verifier in `oauth_states`
//!    with a 10-minute expiry.
//!
//! 2. **[`exchange_code`](LinkedInOAuth::exchange_code)** is called by the
//!    `/api/auth/linkedin/callback` route. It:
//!    - consumes the matching `oauth_states` row (state and expiry checked in one step),
//!    - exchanges the code + verifier for an access token (LinkedIn expects the
//!      client credentials in the request body),
//!    - fetches the OpenID userinfo document,
//!    - upserts the user keyed on `provider = 'linkedin'` + `sub`, so returning
//!      members get their profile refreshed.

use chrono::{Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthorizationCode, CsrfToken, EndpointNotSet, EndpointSet, PkceCodeChallenge,
    PkceCodeVerifier, Scope, TokenResponse,
};
use serde::Deserialize;
use store::models::{AuthProvider, NewUser, OAuthState, Role, User};

use super::config::{OAuthConfig, LINKEDIN_USERINFO_URL};
use crate::error::ApiError;
use crate::state::AppState;

const STATE_TTL_MINUTES: i64 = 10;

/// LinkedIn OpenID userinfo response.
#[derive(Debug, Deserialize)]
struct LinkedInUser {
    sub: String,
    email: String,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl LinkedInUser {
    fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.trim().to_string();
        }
        let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// LinkedIn OAuth handler.
pub struct LinkedInOAuth {
    config: OAuthConfig,
}

impl LinkedInOAuth {
    pub fn new(state: &AppState) -> Result<Self, ApiError> {
        let config = OAuthConfig::linkedin(&state.settings.linkedin)?;
        Ok(Self { config })
    }

    fn create_client(&self) -> ConfiguredClient {
        BasicClient::new(self.config.client_id.clone())
            .set_client_secret(self.config.client_secret.clone())
            .set_auth_uri(self.config.auth_url.clone())
            .set_token_uri(self.config.token_url.clone())
            .set_redirect_uri(self.config.redirect_url.clone())
            .set_auth_type(AuthType::RequestBody)
    }

    /// Generate authorization URL with PKCE.
    pub async fn generate_auth_url(&self, state: &AppState) -> Result<String, ApiError> {
        let client = self.create_client();
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("openid".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        state
            .store
            .insert_oauth_state(OAuthState {
                state: csrf_state.secret().clone(),
                provider: AuthProvider::Linkedin,
                pkce_verifier: pkce_verifier.secret().clone(),
                expires_at: Utc::now() + Duration::minutes(STATE_TTL_MINUTES),
            })
            .await?;

        Ok(auth_url.to_string())
    }

    /// Exchange authorization code for tokens and get user info.
    pub async fn exchange_code(&self, state: &AppState, code: &str, csrf_state: &str) -> Result<User, ApiError> {
        let pkce_verifier = state
            .store
            .take_oauth_state(csrf_state, AuthProvider::Linkedin, Utc::now())
            .await?
            .ok_or_else(|| ApiError::bad_request("Invalid or expired OAuth state"))?;

        // Token exchange must not follow redirects
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let token_result = self
            .create_client()
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
            .request_async(&http_client)
            .await
            .map_err(|e| ApiError::Upstream(format!("Token exchange failed: {e}")))?;

        let access_token = token_result.access_token().secret();

        let profile: LinkedInUser = state
            .http
            .get(LINKEDIN_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let user = state
            .store
            .upsert_oauth_user(NewUser {
                email: profile.email.trim().to_lowercase(),
                name: profile.display_name(),
                avatar_url: profile.picture.clone(),
                role: Role::Member,
                provider: AuthProvider::Linkedin,
                provider_id: profile.sub.clone(),
                password_hash: None,
            })
            .await?;

        tracing::info!(user_id = %user.id, "LinkedIn sign-in");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallbacks() {
        let mut user = LinkedInUser {
            sub: "abc".into(),
            email: "mia@example.org".into(),
            name: Some("Mia Walker".into()),
            given_name: Some("Mia".into()),
            family_name: Some("Walker".into()),
            picture: None,
        };
        assert_eq!(user.display_name(), "Mia Walker");
        user.name = None;
        assert_eq!(user.display_name(), "Mia Walker");
        user.given_name = None;
        user.family_name = None;
        assert_eq!(user.display_name(), "mia@example.org");
    }
}
