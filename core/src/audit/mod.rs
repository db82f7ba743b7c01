//! Audit trail model: context, records, diffing, and redaction.
//!
//! Every mutation to an audited table produces exactly one [`AuditRecord`],
//! written in the same transaction as the mutation itself. The record
//! carries whatever caller identity was attached to that unit of work via
//! [`AuditContext`]; mutations performed outside any tracked unit of work
//! carry null identity.
//!
//! The pieces:
//!
//! - [`AuditContext`]: explicit caller identity, threaded through the
//!   repository layer. Never ambient, never process-global.
//! - [`diff`]: pure computation of `changed_fields` from row snapshots.
//! - [`redaction`]: read-time masking of sensitive values in query results.
//!
//! Record storage and querying live in `waypost-postgres`.

pub mod diff;
pub mod redaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by audit storage and query operations.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Database connection or query error.
    ///
    /// When raised during capture this aborts the enclosing transaction: an
    /// audited mutation never commits without its audit record.
    #[error("Database error: {0}")]
    Database(String),

    /// Snapshot data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A pagination cursor could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// The query parameters are inconsistent.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// The kind of mutation an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A row was created.
    Insert,
    /// A row was modified.
    Update,
    /// A row was removed.
    Delete,
}

impl AuditAction {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which capture path wrote an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    /// Written by the application's repository layer.
    Application,
    /// Written by the safety-net database trigger, for mutations that
    /// bypassed the application entirely.
    Trigger,
}

impl AuditSource {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Trigger => "trigger",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "application" => Some(Self::Application),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }
}

/// Caller identity attached to a unit of work.
///
/// The context is an explicit value handed to the repository performing a
/// mutation. It lives exactly as long as the transaction scope that carries
/// it, so pooled connections never leak one caller's identity into another
/// caller's work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// The acting user.
    pub user_id: String,
    /// The request being served, for cross-system correlation.
    pub request_id: String,
}

impl AuditContext {
    /// Build a context for a caller.
    pub fn new(user_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            request_id: request_id.into(),
        }
    }
}

/// An immutable record of one mutation to an audited table.
///
/// Written in the same transaction as the mutation it describes; never
/// updated or deleted by application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic record id (also the pagination key).
    pub id: i64,
    /// When the mutation was captured.
    pub timestamp: DateTime<Utc>,
    /// The audited table.
    pub table_name: String,
    /// Primary key of the mutated row, as text.
    pub record_id: String,
    /// The kind of mutation.
    pub action: AuditAction,
    /// Acting user, if a context was attached.
    pub user_id: Option<String>,
    /// Originating request, if a context was attached.
    pub request_id: Option<String>,
    /// Row snapshot before the mutation (UPDATE and DELETE).
    pub old_values: Option<serde_json::Value>,
    /// Row snapshot after the mutation (INSERT and UPDATE).
    pub new_values: Option<serde_json::Value>,
    /// Keys whose values differ between the snapshots (UPDATE only).
    pub changed_fields: Option<Vec<String>>,
    /// Which capture path wrote this record.
    pub source: AuditSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_roundtrip() {
        for action in [AuditAction::Insert, AuditAction::Update, AuditAction::Delete] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("TRUNCATE"), None);
    }

    #[test]
    fn source_roundtrip() {
        for source in [AuditSource::Application, AuditSource::Trigger] {
            assert_eq!(AuditSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(AuditSource::parse("replica"), None);
    }
}
