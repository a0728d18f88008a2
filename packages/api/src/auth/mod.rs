//! Authentication: local accounts, LinkedIn sign-in, bearer tokens and sessions.

mod accounts;
mod config;
mod extract;
mod linkedin;
pub mod password;
mod session;
pub mod tokens;

use axum::routing::{get, post};
use axum::Router;

pub use accounts::{AuthResponse, LoginInput, RegisterInput};
pub use config::OAuthConfig;
pub use extract::{bearer_token, AdminUser, CurrentUser};
pub use linkedin::LinkedInOAuth;
pub use session::{MaybeSession, PENDING_TOKENS_KEY, SESSION_USER_ID_KEY};
pub use tokens::TokenPair;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(accounts::register))
        .route("/auth/login", post(accounts::login))
        .route("/auth/refresh", post(accounts::refresh))
        .route("/auth/logout", post(accounts::logout))
        .route("/auth/me", get(accounts::me).patch(accounts::update_me))
        .route("/auth/password-reset", post(accounts::request_password_reset))
        .route("/auth/password-reset/confirm", post(accounts::confirm_password_reset))
        .route("/auth/linkedin", get(accounts::linkedin_start))
        .route("/auth/linkedin/callback", get(accounts::linkedin_callback))
        .route("/auth/linkedin/tokens", post(accounts::linkedin_tokens))
}
