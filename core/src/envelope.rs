//! The submission event envelope.
//!
//! The envelope is the JSON message the gateway publishes when a ticket is
//! accepted. It is created once, never mutated, and may be delivered to a
//! consumer more than once; the `ticket_id` it carries makes redelivery
//! harmless.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "event_type": "organization_suggestion.submitted",
//!   "ticket_id": "S00001",
//!   "submitter_id": "8e5c...",
//!   "submitter_email": "ada@example.org",
//!   "payload": { "name": "Corner Cafe", "latitude": 48.85, "longitude": 2.35 }
//! }
//! ```

use crate::ticket::{TicketId, TicketPayload, TicketType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Failed to serialize the envelope to JSON.
    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    /// Failed to deserialize an envelope from JSON.
    #[error("Failed to deserialize envelope: {0}")]
    Deserialization(String),

    /// The envelope names an event type no registered ticket type produces.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A ticket submission event, as published to the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `<ticket_type>.submitted`; selects the processor handler.
    pub event_type: String,
    /// The pipeline idempotency key.
    pub ticket_id: TicketId,
    /// Who submitted the ticket.
    pub submitter_id: Uuid,
    /// Submitter contact email.
    pub submitter_email: String,
    /// Type-specific payload, shaped per the `event_type`.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build the envelope for a validated submission.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if the payload cannot be
    /// serialized, which does not happen for the built-in payload shapes.
    pub fn submitted(
        ticket_id: TicketId,
        submitter_id: Uuid,
        submitter_email: String,
        payload: &TicketPayload,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            event_type: payload.ticket_type().event_type(),
            ticket_id,
            submitter_id,
            submitter_email,
            payload: payload
                .to_value()
                .map_err(|e| EnvelopeError::Serialization(e.to_string()))?,
        })
    }

    /// The ticket type this envelope was published for.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownEventType`] when the event type is
    /// not one the pipeline produces. Consumers treat this as a permanent
    /// failure: retrying cannot make an unknown type known.
    pub fn ticket_type(&self) -> Result<TicketType, EnvelopeError> {
        TicketType::from_event_type(&self.event_type)
            .ok_or_else(|| EnvelopeError::UnknownEventType(self.event_type.clone()))
    }

    /// Decode the typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::UnknownEventType`] for an unrecognized event
    /// type and [`EnvelopeError::Deserialization`] when the payload does not
    /// match the shape the event type promises.
    pub fn typed_payload(&self) -> Result<TicketPayload, EnvelopeError> {
        let ticket_type = self.ticket_type()?;
        TicketPayload::from_value(ticket_type, self.payload.clone())
            .map_err(|e| EnvelopeError::Deserialization(e.to_string()))
    }

    /// Encode to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] on failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Decode from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Deserialization`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ event_type: {}, ticket_id: {} }}",
            self.event_type, self.ticket_id
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::ticket::OrganizationFeedback;

    fn feedback_envelope() -> Envelope {
        let payload = TicketPayload::OrganizationFeedback(OrganizationFeedback {
            organization_id: Uuid::new_v4(),
            message: "Ramp at the side entrance is blocked".to_string(),
        });
        Envelope::submitted(
            TicketId::new(TicketType::OrganizationFeedback, 3),
            Uuid::new_v4(),
            "ada@example.org".to_string(),
            &payload,
        )
        .unwrap()
    }

    #[test]
    fn envelope_json_roundtrip() {
        let envelope = feedback_envelope();
        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_event_type_matches_ticket_type() {
        let envelope = feedback_envelope();
        assert_eq!(envelope.event_type, "organization_feedback.submitted");
        assert_eq!(
            envelope.ticket_type().unwrap(),
            TicketType::OrganizationFeedback
        );
    }

    #[test]
    fn typed_payload_roundtrip() {
        let envelope = feedback_envelope();
        let payload = envelope.typed_payload().unwrap();
        assert_eq!(payload.ticket_type(), TicketType::OrganizationFeedback);
    }

    #[test]
    fn unknown_event_type_is_reported() {
        let mut envelope = feedback_envelope();
        envelope.event_type = "invoice.created".to_string();
        assert!(matches!(
            envelope.ticket_type(),
            Err(EnvelopeError::UnknownEventType(_))
        ));
    }

    #[test]
    fn malformed_payload_is_reported() {
        let mut envelope = feedback_envelope();
        envelope.payload = serde_json::json!({"message": 42});
        assert!(matches!(
            envelope.typed_payload(),
            Err(EnvelopeError::Deserialization(_))
        ));
    }
}
