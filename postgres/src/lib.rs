//! `PostgreSQL` durable store for the Neighborly engine.
//!
//! Implements [`DurableStore`](neighborly_core::durable::DurableStore) with
//! runtime-checked `sqlx` queries:
//!
//! - Article rows and their reconciled like counts
//! - Per-user like totals
//! - Community items and their reservations
//!
//! Counter batches and reservations each run in a single transaction.
//!
//! # Example
//!
//! ```no_run
//! use neighborly_postgres::{PoolSettings, PostgresDurableStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresDurableStore::connect(
//!     "postgres://localhost/neighborly",
//!     &PoolSettings::default(),
//! )
//! .await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod store;

pub use store::{PoolSettings, PostgresDurableStore};
