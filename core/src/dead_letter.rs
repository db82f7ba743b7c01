//! Dead-letter storage for envelopes that exhausted their retry budget.
//!
//! A message that fails permanently, or transiently on every attempt of its
//! retry budget, is diverted here instead of being retried forever. Entries
//! are kept for manual inspection and reprocessing; a non-empty store is an
//! operational alert condition, not a silent drop.

use crate::envelope::Envelope;
use crate::repository::RepositoryError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Status of a dead-lettered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting investigation or reprocessing.
    Pending,
    /// Currently being reprocessed.
    Processing,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self, RepositoryError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(RepositoryError::Database(format!(
                "Invalid dead letter status: {s}"
            ))),
        }
    }
}

/// A dead-lettered envelope with its failure metadata.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Unique identifier for this entry.
    pub id: i64,
    /// The envelope that failed.
    pub envelope: Envelope,
    /// Error message from the final failure.
    pub error_message: String,
    /// Full error details (debug output), if captured.
    pub error_details: Option<String>,
    /// How many delivery attempts were made before giving up.
    pub attempts: i32,
    /// When processing first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When processing most recently failed.
    pub last_failed_at: DateTime<Utc>,
    /// Current status.
    pub status: DeadLetterStatus,
    /// When the entry was resolved or discarded, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it.
    pub resolved_by: Option<String>,
    /// Notes about the resolution.
    pub resolution_notes: Option<String>,
}

/// Destination for envelopes the pipeline gave up on.
///
/// The minimal trait covers what the consumer and the alert monitor need;
/// the Postgres implementation adds inspection and resolution operations.
pub trait DeadLetterStore: Send + Sync {
    /// Record a failed envelope.
    ///
    /// Returns the id of the created entry.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the entry cannot be written.
    fn add_entry<'a>(
        &'a self,
        envelope: &'a Envelope,
        error_message: &'a str,
        error_details: Option<&'a str>,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + 'a>>;

    /// Count entries awaiting attention.
    ///
    /// A non-zero count is the pipeline's operational alert signal.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the count fails.
    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dead_letter_status_roundtrip() {
        for status in [
            DeadLetterStatus::Pending,
            DeadLetterStatus::Processing,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            assert_eq!(DeadLetterStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn dead_letter_status_invalid() {
        assert!(DeadLetterStatus::parse("unknown").is_err());
    }
}
