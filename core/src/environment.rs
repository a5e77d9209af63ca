//! Injected environment dependencies.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// The consumer scheduler validates windows against this clock, and article
/// creation stamps rows with it.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
