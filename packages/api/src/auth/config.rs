//! OAuth provider configuration from settings.

use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, TokenUrl};

use crate::error::ApiError;
use crate::settings::LinkedIn;

pub const LINKEDIN_AUTH_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
pub const LINKEDIN_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
pub const LINKEDIN_USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";

/// OAuth provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
    pub redirect_url: RedirectUrl,
}

impl OAuthConfig {
    /// Create LinkedIn OAuth config from the `[linkedin]` settings section.
    pub fn linkedin(settings: &LinkedIn) -> Result<Self, ApiError> {
        if !settings.is_configured() {
            return Err(ApiError::NotFound("LinkedIn sign-in is not enabled".into()));
        }

        let invalid = |e: oauth2::url::ParseError| ApiError::Internal(format!("Invalid LinkedIn URL: {e}"));

        Ok(Self {
            client_id: ClientId::new(settings.client_id.clone()),
            client_secret: ClientSecret::new(settings.client_secret.clone()),
            auth_url: AuthUrl::new(LINKEDIN_AUTH_URL.to_string()).map_err(invalid)?,
            token_url: TokenUrl::new(LINKEDIN_TOKEN_URL.to_string()).map_err(invalid)?,
            redirect_url: RedirectUrl::new(settings.redirect_url.clone()).map_err(invalid)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_linkedin_is_disabled() {
        assert!(matches!(
            OAuthConfig::linkedin(&LinkedIn::default()),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_linkedin_config() {
        let config = OAuthConfig::linkedin(&LinkedIn {
            client_id: "client".into(),
            client_secret: "secret".into(),
            redirect_url: "http://localhost:4000/api/auth/linkedin/callback".into(),
        })
        .unwrap();
        assert_eq!(config.auth_url.as_str(), LINKEDIN_AUTH_URL);
        assert_eq!(config.client_id.as_str(), "client");
    }
}
