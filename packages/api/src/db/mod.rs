//! # PostgreSQL persistence
//!
//! - [`connect`] opens the pool sized from [`crate::settings::Database`].
//! - [`migrate`] applies `packages/api/migrations` with `sqlx::migrate!`.
//! - [`PgStore`] implements every repository trait of the `store` crate with
//!   runtime-checked `query`/`query_as` calls. Multi-row writes run in a transaction.

mod pg_store;
mod pool;

pub use pg_store::PgStore;
pub use pool::{connect, migrate};
