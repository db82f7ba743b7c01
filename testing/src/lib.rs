//! # Waypost Testing
//!
//! In-process fakes and helpers for testing the Waypost pipeline without a
//! broker or a database:
//!
//! - [`bus::InMemoryBus`]: a `MessageBus` backed by channels, with the same
//!   at-least-once surface as the Redpanda implementation (publish twice to
//!   simulate redelivery).
//! - [`store::InMemoryTicketStore`]: a `TicketRepository` with idempotent
//!   insert semantics, sequence allocation, an in-memory audit log, and
//!   fault injection for transient-failure tests.
//! - [`store::InMemoryDeadLetters`]: a `DeadLetterStore` recording diverted
//!   envelopes.
//! - [`mocks`]: fixed clock and notifier doubles.
//!
//! Everything here implements the exact traits production code uses, so
//! pipeline tests exercise the real gateway/processor/consumer code paths.

pub mod bus;
pub mod mocks;
pub mod store;

pub use bus::InMemoryBus;
pub use mocks::{FailingNotifier, FixedClock, RecordingNotifier, test_clock};
pub use store::{InMemoryDeadLetters, InMemoryTicketStore};
