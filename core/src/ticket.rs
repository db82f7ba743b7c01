//! Ticket domain types.
//!
//! A ticket is a user-submitted item that requires asynchronous processing
//! and eventual admin review: a request for edit access to an organization,
//! a suggestion for a new place, or feedback about an existing one.
//!
//! # Identity
//!
//! Every ticket carries two identifiers:
//!
//! - `id`: an opaque [`Uuid`] primary key
//! - `ticket_id`: a human-readable code built from a per-type prefix and a
//!   zero-padded sequence number (e.g. `S00001`)
//!
//! The `ticket_id` is globally unique and serves as the idempotency key for
//! the entire pipeline: the submission envelope carries it, and the processor
//! uses it to detect duplicate deliveries.
//!
//! # Status
//!
//! Status transitions are one-way: `Pending -> {Approved, Rejected}`. Once a
//! ticket reaches a terminal state it never leaves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// The kinds of tickets users can submit.
///
/// New ticket types are added by defining a payload struct and registering a
/// handler for the corresponding event type; no central dispatch code needs
/// to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Request for edit access to an existing organization.
    AccessRequest,
    /// Suggestion for a new place to add to the map.
    OrganizationSuggestion,
    /// Feedback about an existing organization.
    OrganizationFeedback,
}

impl TicketType {
    /// Stable string identifier, matching the serde representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AccessRequest => "access_request",
            Self::OrganizationSuggestion => "organization_suggestion",
            Self::OrganizationFeedback => "organization_feedback",
        }
    }

    /// Single-letter prefix used when formatting a [`TicketId`].
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::AccessRequest => 'A',
            Self::OrganizationSuggestion => 'S',
            Self::OrganizationFeedback => 'F',
        }
    }

    /// The event type published when a ticket of this kind is submitted.
    ///
    /// One event type per ticket type, suffixed `.submitted`.
    #[must_use]
    pub fn event_type(&self) -> String {
        format!("{}.submitted", self.as_str())
    }

    /// Resolve a ticket type from an event type string.
    ///
    /// Returns `None` for event types no ticket type produces.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "access_request.submitted" => Some(Self::AccessRequest),
            "organization_suggestion.submitted" => Some(Self::OrganizationSuggestion),
            "organization_feedback.submitted" => Some(Self::OrganizationFeedback),
            _ => None,
        }
    }

    /// Parse from the stable string identifier (database representation).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "access_request" => Some(Self::AccessRequest),
            "organization_suggestion" => Some(Self::OrganizationSuggestion),
            "organization_feedback" => Some(Self::OrganizationFeedback),
            _ => None,
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable ticket identifier: type prefix plus zero-padded sequence.
///
/// # Examples
///
/// ```
/// use waypost_core::ticket::{TicketId, TicketType};
///
/// let id = TicketId::new(TicketType::OrganizationSuggestion, 1);
/// assert_eq!(id.as_str(), "S00001");
///
/// let parsed = TicketId::parse("S00001").unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Sequence numbers are padded to this width. Wider sequences simply
    /// produce longer ids; the space never wraps.
    const PAD_WIDTH: usize = 5;

    /// Format a ticket id from a type and an allocated sequence number.
    #[must_use]
    pub fn new(ticket_type: TicketType, sequence: u64) -> Self {
        Self(format!(
            "{}{:0width$}",
            ticket_type.prefix(),
            sequence,
            width = Self::PAD_WIDTH
        ))
    }

    /// Parse and validate a ticket id string.
    ///
    /// Returns `None` when the prefix is unknown or the remainder is not a
    /// sequence number.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let prefix = chars.next()?;
        let rest = chars.as_str();
        if rest.len() < Self::PAD_WIDTH || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match prefix {
            'A' | 'S' | 'F' => Some(Self(s.to_string())),
            _ => None,
        }
    }

    /// The string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket review status.
///
/// `Pending` is the only non-terminal state. Transitions out of `Approved`
/// or `Rejected` are rejected by the repository layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Awaiting admin review.
    Pending,
    /// Approved by an admin. Terminal.
    Approved,
    /// Rejected by an admin. Terminal.
    Rejected,
}

impl TicketStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Whether a transition from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved | Self::Rejected)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field-level validation failure, reported by the gateway before anything
/// is published.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// The payload field that failed validation.
    pub field: String,
    /// Human-readable description of the constraint that was violated.
    pub message: String,
}

impl ValidationError {
    /// Build a validation error for a named field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn check_len(
    errors: &mut Vec<ValidationError>,
    field: &str,
    value: &str,
    min: usize,
    max: usize,
) {
    if value.len() < min {
        errors.push(ValidationError::new(field, "must not be empty"));
    } else if value.len() > max {
        errors.push(ValidationError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
}

/// Payload for an access request ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Organization the submitter wants edit access to.
    pub organization_id: Uuid,
    /// Why access is requested.
    pub reason: String,
}

impl AccessRequest {
    /// Validate field constraints, collecting every violation.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        check_len(&mut errors, "reason", &self.reason, 1, 1000);
        errors
    }
}

/// Payload for a new-place suggestion ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSuggestion {
    /// Proposed organization name.
    pub name: String,
    /// Latitude in degrees, `-90.0..=90.0`.
    pub latitude: f64,
    /// Longitude in degrees, `-180.0..=180.0`.
    pub longitude: f64,
    /// Street address, if known.
    pub address: Option<String>,
    /// Website URL, if known.
    pub website: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
}

impl OrganizationSuggestion {
    /// Validate field constraints, collecting every violation.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        check_len(&mut errors, "name", &self.name, 1, 200);
        if !(-90.0..=90.0).contains(&self.latitude) || !self.latitude.is_finite() {
            errors.push(ValidationError::new(
                "latitude",
                "must be between -90 and 90",
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) || !self.longitude.is_finite() {
            errors.push(ValidationError::new(
                "longitude",
                "must be between -180 and 180",
            ));
        }
        if let Some(address) = &self.address {
            check_len(&mut errors, "address", address, 0, 500);
        }
        if let Some(website) = &self.website {
            check_len(&mut errors, "website", website, 0, 500);
        }
        if let Some(description) = &self.description {
            check_len(&mut errors, "description", description, 0, 2000);
        }
        errors
    }
}

/// Payload for an organization feedback ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationFeedback {
    /// Organization the feedback concerns.
    pub organization_id: Uuid,
    /// The feedback message.
    pub message: String,
}

impl OrganizationFeedback {
    /// Validate field constraints, collecting every violation.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        check_len(&mut errors, "message", &self.message, 1, 2000);
        errors
    }
}

/// Type-specific ticket payload.
///
/// Serialized without a tag: the ticket type (stored separately, and carried
/// by the envelope's `event_type`) selects the variant on decode via
/// [`TicketPayload::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TicketPayload {
    /// See [`AccessRequest`].
    AccessRequest(AccessRequest),
    /// See [`OrganizationSuggestion`].
    OrganizationSuggestion(OrganizationSuggestion),
    /// See [`OrganizationFeedback`].
    OrganizationFeedback(OrganizationFeedback),
}

impl TicketPayload {
    /// The ticket type this payload belongs to.
    #[must_use]
    pub const fn ticket_type(&self) -> TicketType {
        match self {
            Self::AccessRequest(_) => TicketType::AccessRequest,
            Self::OrganizationSuggestion(_) => TicketType::OrganizationSuggestion,
            Self::OrganizationFeedback(_) => TicketType::OrganizationFeedback,
        }
    }

    /// Validate the payload's field constraints.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationError> {
        match self {
            Self::AccessRequest(p) => p.validate(),
            Self::OrganizationSuggestion(p) => p.validate(),
            Self::OrganizationFeedback(p) => p.validate(),
        }
    }

    /// Serialize to a JSON value (the envelope/database representation).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which cannot happen for
    /// these payload shapes in practice.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::AccessRequest(p) => serde_json::to_value(p),
            Self::OrganizationSuggestion(p) => serde_json::to_value(p),
            Self::OrganizationFeedback(p) => serde_json::to_value(p),
        }
    }

    /// Decode a payload of a known ticket type from a JSON value.
    ///
    /// The explicit type discriminator avoids the ambiguity of untagged
    /// enum deserialization.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the value does not match the
    /// payload shape for `ticket_type`.
    pub fn from_value(
        ticket_type: TicketType,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match ticket_type {
            TicketType::AccessRequest => serde_json::from_value(value).map(Self::AccessRequest),
            TicketType::OrganizationSuggestion => {
                serde_json::from_value(value).map(Self::OrganizationSuggestion)
            }
            TicketType::OrganizationFeedback => {
                serde_json::from_value(value).map(Self::OrganizationFeedback)
            }
        }
    }
}

/// A durably stored ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Opaque primary key.
    pub id: Uuid,
    /// Human-readable identifier; the pipeline idempotency key.
    pub ticket_id: TicketId,
    /// Who submitted the ticket.
    pub submitter_id: Uuid,
    /// Submitter contact email, used for review notifications.
    pub submitter_email: String,
    /// Type-specific payload.
    pub payload: TicketPayload,
    /// Review status.
    pub status: TicketStatus,
    /// When the ticket row was created by the processor.
    pub created_at: DateTime<Utc>,
    /// When the ticket was reviewed, if it has been.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Who reviewed the ticket, if it has been.
    pub reviewed_by: Option<String>,
    /// Free-form notes left by the reviewing admin.
    pub admin_notes: Option<String>,
}

impl Ticket {
    /// Build a freshly submitted ticket in `Pending` status.
    #[must_use]
    pub fn submitted(
        ticket_id: TicketId,
        submitter_id: Uuid,
        submitter_email: String,
        payload: TicketPayload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            submitter_id,
            submitter_email,
            payload,
            status: TicketStatus::Pending,
            created_at,
            reviewed_at: None,
            reviewed_by: None,
            admin_notes: None,
        }
    }

    /// The ticket type, derived from the payload.
    #[must_use]
    pub const fn ticket_type(&self) -> TicketType {
        self.payload.ticket_type()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn ticket_id_formats_with_padding() {
        assert_eq!(
            TicketId::new(TicketType::OrganizationSuggestion, 1).as_str(),
            "S00001"
        );
        assert_eq!(TicketId::new(TicketType::AccessRequest, 42).as_str(), "A00042");
        assert_eq!(
            TicketId::new(TicketType::OrganizationFeedback, 123_456).as_str(),
            "F123456"
        );
    }

    #[test]
    fn ticket_id_parse_roundtrip() {
        for (ticket_type, seq) in [
            (TicketType::AccessRequest, 1),
            (TicketType::OrganizationSuggestion, 99_999),
            (TicketType::OrganizationFeedback, 7),
        ] {
            let id = TicketId::new(ticket_type, seq);
            assert_eq!(TicketId::parse(id.as_str()), Some(id));
        }
    }

    #[test]
    fn ticket_id_parse_rejects_garbage() {
        assert_eq!(TicketId::parse(""), None);
        assert_eq!(TicketId::parse("X00001"), None);
        assert_eq!(TicketId::parse("S1"), None);
        assert_eq!(TicketId::parse("Sabcde"), None);
    }

    #[test]
    fn event_type_roundtrip() {
        for ticket_type in [
            TicketType::AccessRequest,
            TicketType::OrganizationSuggestion,
            TicketType::OrganizationFeedback,
        ] {
            let event_type = ticket_type.event_type();
            assert!(event_type.ends_with(".submitted"));
            assert_eq!(TicketType::from_event_type(&event_type), Some(ticket_type));
        }
        assert_eq!(TicketType::from_event_type("order.placed"), None);
    }

    #[test]
    fn status_transitions_are_one_way() {
        use TicketStatus::{Approved, Pending, Rejected};

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Pending.can_transition_to(Pending));
        assert!(Approved.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn suggestion_coordinate_validation() {
        let mut suggestion = OrganizationSuggestion {
            name: "Corner Cafe".to_string(),
            latitude: 48.8566,
            longitude: 2.3522,
            address: None,
            website: None,
            description: None,
        };
        assert!(suggestion.validate().is_empty());

        suggestion.latitude = 91.0;
        suggestion.longitude = -200.0;
        let errors = suggestion.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["latitude", "longitude"]);
    }

    #[test]
    fn suggestion_rejects_empty_name_and_long_description() {
        let suggestion = OrganizationSuggestion {
            name: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            address: None,
            website: None,
            description: Some("d".repeat(2001)),
        };
        let errors = suggestion.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "name");
        assert_eq!(errors[1].field, "description");
    }

    #[test]
    fn payload_value_roundtrip_by_type() {
        let payload = TicketPayload::OrganizationFeedback(OrganizationFeedback {
            organization_id: Uuid::new_v4(),
            message: "The listed opening hours are out of date".to_string(),
        });

        let value = payload.to_value().unwrap();
        let decoded =
            TicketPayload::from_value(TicketType::OrganizationFeedback, value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payload_decode_rejects_wrong_shape() {
        let value = serde_json::json!({"unexpected": true});
        assert!(TicketPayload::from_value(TicketType::AccessRequest, value).is_err());
    }
}
