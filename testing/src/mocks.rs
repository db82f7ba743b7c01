//! Clock and notifier doubles.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use waypost_core::clock::Clock;
use waypost_core::notify::{Notifier, NotifyError};
use waypost_core::ticket::{Ticket, TicketId};

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
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

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which never happens.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Notifier that records which tickets it was asked to announce.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<TicketId>>,
}

impl RecordingNotifier {
    /// Create an empty recording notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket ids notified so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock was poisoned by a panicking test.
    #[must_use]
    pub fn sent(&self) -> Vec<TicketId> {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn ticket_received<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
            self.sent.lock().unwrap().push(ticket.ticket_id.clone());
            Ok(())
        })
    }
}

/// Notifier whose every send fails, for testing that notification failures
/// never fail the message.
#[derive(Default)]
pub struct FailingNotifier;

impl FailingNotifier {
    /// Create a failing notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for FailingNotifier {
    fn ticket_received<'a>(
        &'a self,
        _ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async {
            Err(NotifyError::DeliveryFailed(
                "smtp relay unavailable".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
