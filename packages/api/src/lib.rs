//! # API crate: the HTTP backend of Ngurra Pathways
//!
//! Everything the web frontend talks to lives here: the axum router, the
//! feature services behind it, and the integrations with Stripe, LinkedIn and
//! S3-compatible storage. Persistence goes through the repository traits of the
//! `store` crate; [`db::PgStore`] is the PostgreSQL implementation.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`auth`] | Local and LinkedIn sign-in, bearer tokens, sessions, password reset, extractors |
//! | [`messaging`] | Direct and group conversations, messages, unread counters |
//! | [`jobs`] | Job board and the application pipeline |
//! | [`mentorship`] | Mentor directory and session booking |
//! | [`social`] | Community feed: posts, likes, comments |
//! | [`billing`] | Stripe checkout, customer portal and webhooks |
//! | [`uploads`] | Presigned S3 uploads |
//! | [`notifications`] | In-app notifications |
//! | [`realtime`] | Per-user WebSocket event fan-out |
//! | [`email`] | Transactional email templates and the mailer seam |
//! | [`admin`] | Platform statistics and user management |
//! | [`client`] | Token store and HTTP client used by Rust consumers of the API |
//! | [`db`] | Connection pool and the PostgreSQL [`store::Store`] |
//! | [`settings`] | Layered configuration |
//! | [`routes`] | Assembly of the full router |
//!
//! Services are plain `async fn`s taking [`AppState`]; handlers are thin
//! adapters that extract, call the service, and shape the response.

pub mod admin;
pub mod auth;
pub mod billing;
pub mod client;
pub mod db;
pub mod email;
pub mod error;
pub mod jobs;
pub mod mentorship;
pub mod messaging;
pub mod middleware;
pub mod notifications;
pub mod realtime;
pub mod routes;
pub mod settings;
pub mod social;
pub mod state;
pub mod uploads;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ApiError, ApiResult};
pub use routes::app;
pub use settings::Settings;
pub use state::AppState;
pub use store::models::UserInfo;
