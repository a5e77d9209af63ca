//! # Neighborly Testing
//!
//! In-memory collaborators and helpers for testing the Neighborly engine
//! without Redis, `PostgreSQL` or Redpanda.
//!
//! This crate provides:
//! - [`InMemoryCacheStore`]: hashes, sets, lists and sorted sets behind one lock
//! - [`FaultyCacheStore`]: wraps a cache and fails chosen calls on demand
//! - [`InMemoryDurableStore`]: article, item and reservation rows
//! - [`InMemoryBroker`]: competing-consumer FIFO queues
//! - [`FixedClock`]: deterministic time
//! - [`properties`]: proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use neighborly_testing::{InMemoryBroker, InMemoryCacheStore, InMemoryDurableStore};
//!
//! #[tokio::test]
//! async fn test_reserve() {
//!     let cache = Arc::new(InMemoryCacheStore::new());
//!     let durable = Arc::new(InMemoryDurableStore::new());
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let engine = InventoryEngine::new(cache, durable, broker, KeySpace::default(), "reservations");
//!     // ...
//! }
//! ```

mod broker;
mod cache;
mod durable;

pub use broker::InMemoryBroker;
pub use cache::{FaultyCacheStore, InMemoryCacheStore};
pub use durable::InMemoryDurableStore;

use chrono::{DateTime, Utc};
use neighborly_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making window validation reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use neighborly_testing::mocks::FixedClock;
    /// use neighborly_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing strategies for domain values.
pub mod properties {
    use neighborly_core::model::{ItemId, ReservationMessage, UserId};
    use proptest::prelude::*;

    /// Distinct user ids, between `1` and `max_len` of them.
    pub fn distinct_users(max_len: usize) -> impl Strategy<Value = Vec<UserId>> {
        proptest::collection::btree_set(1_i64..10_000, 1..=max_len.max(1))
            .prop_map(|ids| ids.into_iter().map(UserId).collect())
    }

    /// Reservation messages over small id ranges, so duplicates occur.
    pub fn reservation_messages() -> impl Strategy<Value = ReservationMessage> {
        (1_i64..20, 1_i64..4)
            .prop_map(|(actor, item)| ReservationMessage::new(UserId(actor), ItemId(item)))
    }

    /// Broker payloads that are not valid reservation messages.
    pub fn malformed_payloads() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z]{1,8}",
            "[0-9]{1,4}",
            "[0-9]{1,4},[0-9]{1,4},[0-9]{1,4}",
            "[0-9]{1,4};[0-9]{1,4}",
        ]
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
