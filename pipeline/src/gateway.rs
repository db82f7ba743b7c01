//! Submission gateway.
//!
//! The gateway is the pipeline's producer side. It validates a submission,
//! allocates the human-readable ticket id, and publishes the envelope. It
//! returns as soon as the broker has the envelope; processing happens
//! asynchronously, and the returned `ticket_id` is the tracking handle.
//!
//! # Failure semantics
//!
//! - Invalid input is rejected with field-level errors and nothing is
//!   published or allocated.
//! - A publish failure is surfaced to the caller for an explicit retry. The
//!   drawn sequence number is abandoned; the retry draws a fresh one, so an
//!   id is never attached to two submissions. Gaps in the id space are
//!   acceptable.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use waypost_core::bus::{BusError, MessageBus};
use waypost_core::clock::Clock;
use waypost_core::envelope::{Envelope, EnvelopeError};
use waypost_core::repository::{RepositoryError, TicketRepository};
use waypost_core::ticket::{TicketId, TicketPayload, ValidationError};

/// Errors a submission can fail with.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The submission is invalid; nothing was published. Not retryable
    /// without fixing the input (the 4xx-equivalent).
    #[error("Validation failed: {0:?}")]
    Validation(Vec<ValidationError>),

    /// Allocating the ticket id failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The envelope could not be built.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The broker did not accept the envelope; the caller should retry the
    /// whole submission (the 5xx-equivalent).
    #[error(transparent)]
    Publish(#[from] BusError),
}

/// A validated submission, before an id has been allocated.
///
/// Authentication happens upstream; the gateway trusts the submitter
/// identity it is handed.
#[derive(Debug, Clone)]
pub struct NewTicket {
    /// The authenticated submitter.
    pub submitter_id: Uuid,
    /// Submitter contact email.
    pub submitter_email: String,
    /// Type-discriminated payload.
    pub payload: TicketPayload,
}

/// Accepted-but-not-yet-processed result (the 202-equivalent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Tracking handle for the submission.
    pub ticket_id: TicketId,
}

/// The pipeline's producer side.
pub struct SubmissionGateway {
    repository: Arc<dyn TicketRepository>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    topic: String,
}

impl SubmissionGateway {
    /// Create a gateway publishing to the given topic.
    pub fn new(
        repository: Arc<dyn TicketRepository>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            bus,
            clock,
            topic: topic.into(),
        }
    }

    /// Validate, allocate an id, and publish.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]; only [`GatewayError::Publish`] (and transient
    /// repository failures) are worth retrying as-is.
    pub async fn submit(&self, submission: NewTicket) -> Result<Accepted, GatewayError> {
        let mut errors = Vec::new();
        if !submission.submitter_email.contains('@') {
            errors.push(ValidationError::new(
                "submitter_email",
                "must be an email address",
            ));
        }
        errors.extend(submission.payload.validate());
        if !errors.is_empty() {
            return Err(GatewayError::Validation(errors));
        }

        let ticket_type = submission.payload.ticket_type();
        let sequence = self.repository.next_sequence(ticket_type).await?;
        let ticket_id = TicketId::new(ticket_type, sequence);

        let envelope = Envelope::submitted(
            ticket_id.clone(),
            submission.submitter_id,
            submission.submitter_email,
            &submission.payload,
        )?;

        self.bus.publish(&self.topic, &envelope).await?;

        tracing::info!(
            ticket_id = %ticket_id,
            ticket_type = %ticket_type,
            submitted_at = %self.clock.now(),
            "Submission accepted"
        );
        metrics::counter!("pipeline.submissions.published", "ticket_type" => ticket_type.as_str())
            .increment(1);

        Ok(Accepted { ticket_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_kinds_are_distinguishable() {
        let validation = GatewayError::Validation(vec![ValidationError::new("name", "empty")]);
        assert!(matches!(validation, GatewayError::Validation(_)));

        let publish: GatewayError = BusError::PublishFailed {
            topic: "tickets".to_string(),
            reason: "broker down".to_string(),
        }
        .into();
        assert!(matches!(publish, GatewayError::Publish(_)));
    }
}
