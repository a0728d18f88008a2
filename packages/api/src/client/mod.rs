//! Client side of the API for Rust consumers: a token store with an idle
//! timeout and a `reqwest` client that refreshes expired access tokens.

mod http;
mod token_store;

pub use http::{ApiClient, ClientError};
pub use token_store::{TokenStore, Tokens, DEFAULT_IDLE_TIMEOUT};
