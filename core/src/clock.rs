//! Clock abstraction for testable timestamps.

use chrono::{DateTime, Utc};

/// Abstracts time so tests can pin it.
///
/// Production code uses [`SystemClock`]; tests use the fixed clock from
/// `waypost-testing`.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
