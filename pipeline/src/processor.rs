//! Ticket processor: event-type dispatch and idempotent handling.
//!
//! Dispatch is a registration table, not a branching chain: adding a ticket
//! type means registering one more handler, never editing an existing one.
//!
//! Each built-in handler follows the same shape:
//!
//! 1. Decode the typed payload (malformed input is a permanent failure).
//! 2. `insert_if_absent` through the repository. A duplicate is a harmless
//!    redelivery: acknowledge without re-inserting or re-notifying.
//! 3. Only after the insert committed, send the notification. A failed
//!    notification is logged and counted, never propagated; the ticket is
//!    already durable and a redelivery would only duplicate the send.
//!
//! Anything that fails *before* the insert commits propagates as a
//! [`ProcessError`] so the retry/dead-letter machinery applies.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use waypost_core::clock::Clock;
use waypost_core::envelope::{Envelope, EnvelopeError};
use waypost_core::notify::Notifier;
use waypost_core::repository::{InsertOutcome, RepositoryError, TicketRepository};
use waypost_core::ticket::{Ticket, TicketType};

/// Classified processing failure.
///
/// The distinction drives the retry loop: transient failures are retried up
/// to the attempt budget, permanent ones are diverted to the dead-letter
/// store immediately since no retry can ever succeed.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Infrastructure was unavailable (database, notification dependency
    /// reached before the insert). Retryable.
    #[error("Transient processing failure: {0}")]
    Transient(String),

    /// The message itself can never succeed: malformed payload, unknown
    /// event type. Not retryable.
    #[error("Permanent processing failure: {0}")]
    Permanent(String),
}

impl ProcessError {
    /// Whether retrying is pointless.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl From<EnvelopeError> for ProcessError {
    fn from(e: EnvelopeError) -> Self {
        // Shape problems never fix themselves on redelivery.
        Self::Permanent(e.to_string())
    }
}

impl From<RepositoryError> for ProcessError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Serialization(reason) => Self::Permanent(reason),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Handler for one event type.
#[async_trait]
pub trait TicketHandler: Send + Sync + 'static {
    /// Process one envelope. Must be safe to run twice for the same
    /// `ticket_id` with identical net effect.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProcessError`]; the consumer decides between
    /// retry and dead-lettering based on the classification.
    async fn handle(&self, envelope: &Envelope) -> Result<(), ProcessError>;
}

/// Registration table mapping `event_type` to its handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TicketHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn TicketHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// The registered event types, for logging at startup.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Dispatch an envelope to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Permanent`] for event types nothing is
    /// registered for, otherwise whatever the handler returns.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), ProcessError> {
        match self.handlers.get(&envelope.event_type) {
            Some(handler) => handler.handle(envelope).await,
            None => Err(ProcessError::Permanent(format!(
                "no handler registered for event type '{}'",
                envelope.event_type
            ))),
        }
    }
}

/// The built-in handler for `<ticket_type>.submitted` events.
///
/// One instance per ticket type; the type is pinned at registration so a
/// payload is always decoded against the shape its event type promises.
pub struct SubmittedTicketHandler {
    ticket_type: TicketType,
    repository: Arc<dyn TicketRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SubmittedTicketHandler {
    /// Create a handler for one ticket type.
    pub fn new(
        ticket_type: TicketType,
        repository: Arc<dyn TicketRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ticket_type,
            repository,
            notifier,
            clock,
        }
    }
}

#[async_trait]
impl TicketHandler for SubmittedTicketHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), ProcessError> {
        let payload = envelope.typed_payload()?;

        let ticket = Ticket::submitted(
            envelope.ticket_id.clone(),
            envelope.submitter_id,
            envelope.submitter_email.clone(),
            payload,
            self.clock.now(),
        );

        match self.repository.insert_if_absent(&ticket).await? {
            InsertOutcome::Duplicate => {
                // At-least-once delivery at work. The first delivery already
                // stored and notified; acknowledge and do nothing.
                debug!(
                    ticket_id = %ticket.ticket_id,
                    "Duplicate delivery, already processed"
                );
                metrics::counter!(
                    "pipeline.tickets.duplicates",
                    "ticket_type" => self.ticket_type.as_str()
                )
                .increment(1);
                Ok(())
            }
            InsertOutcome::Inserted => {
                info!(
                    ticket_id = %ticket.ticket_id,
                    ticket_type = %self.ticket_type,
                    "Ticket stored"
                );
                metrics::counter!(
                    "pipeline.tickets.processed",
                    "ticket_type" => self.ticket_type.as_str()
                )
                .increment(1);

                // Insert-then-notify: the ticket is durable, so a failed
                // notification must not push the message back into the
                // queue.
                if let Err(e) = self.notifier.ticket_received(&ticket).await {
                    warn!(
                        ticket_id = %ticket.ticket_id,
                        error = %e,
                        "Notification failed after ticket was stored; not retrying"
                    );
                    metrics::counter!("pipeline.notifications.failed").increment(1);
                }
                Ok(())
            }
        }
    }
}

/// Build a registry with the built-in handlers for all three ticket types.
#[must_use]
pub fn builtin_registry(
    repository: Arc<dyn TicketRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for ticket_type in [
        TicketType::AccessRequest,
        TicketType::OrganizationSuggestion,
        TicketType::OrganizationFeedback,
    ] {
        registry.register(
            ticket_type.event_type(),
            Arc::new(SubmittedTicketHandler::new(
                ticket_type,
                repository.clone(),
                notifier.clone(),
                clock.clone(),
            )),
        );
    }
    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_is_permanent() {
        let registry = HandlerRegistry::new();
        let envelope = Envelope {
            event_type: "invoice.created".to_string(),
            ticket_id: waypost_core::ticket::TicketId::new(TicketType::AccessRequest, 1),
            submitter_id: uuid::Uuid::new_v4(),
            submitter_email: "a@example.org".to_string(),
            payload: serde_json::json!({}),
        };
        let err = tokio_test::block_on(registry.dispatch(&envelope)).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn repository_errors_classify_by_kind() {
        let transient: ProcessError =
            RepositoryError::Database("connection refused".to_string()).into();
        assert!(!transient.is_permanent());

        let permanent: ProcessError =
            RepositoryError::Serialization("bad payload".to_string()).into();
        assert!(permanent.is_permanent());
    }
}
