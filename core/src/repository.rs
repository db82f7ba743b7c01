//! Ticket repository abstraction.
//!
//! The repository is where the pipeline's exactly-once *effect* is enforced:
//! a uniqueness constraint on `ticket_id` is the single source of truth for
//! idempotency, and [`TicketRepository::insert_if_absent`] reports a
//! constraint hit as the [`InsertOutcome::Duplicate`] value, never as an
//! error.
//!
//! # Implementations
//!
//! - `PostgresTicketRepository` (`waypost-postgres`): production, writes the
//!   ticket and its audit record in one transaction.
//! - `InMemoryTicketStore` (`waypost-testing`): deterministic tests.

use crate::audit::AuditContext;
use crate::ticket::{Ticket, TicketId, TicketStatus, TicketType};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Row data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No ticket with the given id exists.
    #[error("Ticket not found: {0}")]
    NotFound(TicketId),

    /// A review attempted to move a ticket out of a terminal status.
    ///
    /// Status transitions are one-way; this is rejected without touching
    /// the row.
    #[error("Ticket {ticket_id} is already {status}, status is terminal")]
    TerminalStatus {
        /// The ticket whose status was terminal.
        ticket_id: TicketId,
        /// The current, terminal status.
        status: TicketStatus,
    },

    /// The review carried a status that is not a review outcome.
    #[error("{0} is not a valid review outcome")]
    InvalidReviewStatus(TicketStatus),
}

/// Outcome of an idempotent insert.
///
/// A duplicate is a normal, expected result of at-least-once delivery, so it
/// is modeled as a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The ticket row was created by this call.
    Inserted,
    /// A ticket with this `ticket_id` already existed; nothing was written.
    Duplicate,
}

/// An admin's review decision, applied to a pending ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketReview {
    /// The terminal status to move to (`Approved` or `Rejected`).
    pub status: TicketStatus,
    /// Who performed the review.
    pub reviewed_by: String,
    /// Optional notes for the submitter or other admins.
    pub admin_notes: Option<String>,
}

/// Durable ticket storage.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of `async fn` so the
/// repository can be shared as `Arc<dyn TicketRepository>` across handlers.
pub trait TicketRepository: Send + Sync {
    /// Atomically allocate the next sequence number for a ticket type.
    ///
    /// Concurrent callers each receive a distinct value; gaps are allowed
    /// (a sequence number drawn for a submission whose publish fails is
    /// simply abandoned), reuse is not.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the allocation fails.
    fn next_sequence(
        &self,
        ticket_type: TicketType,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + '_>>;

    /// Insert a ticket unless one with the same `ticket_id` already exists.
    ///
    /// The uniqueness constraint on `ticket_id` is the idempotency source of
    /// truth: a constraint violation maps to [`InsertOutcome::Duplicate`].
    /// Implementations write the INSERT audit record in the same transaction
    /// as the row.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] for infrastructure failures
    /// (these are transient from the processor's point of view) and
    /// [`RepositoryError::Serialization`] when the payload cannot be
    /// encoded.
    fn insert_if_absent<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, RepositoryError>> + Send + 'a>>;

    /// Fetch a ticket by its human-readable id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the lookup fails. A missing
    /// ticket is `Ok(None)`, not an error.
    fn get<'a>(
        &'a self,
        ticket_id: &'a TicketId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Ticket>, RepositoryError>> + Send + 'a>>;

    /// Apply an admin review, moving a pending ticket to a terminal status.
    ///
    /// The mutation is audited under the attached context: the UPDATE audit
    /// record commits with the row or not at all.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] if the ticket does not exist.
    /// - [`RepositoryError::TerminalStatus`] if the ticket was already
    ///   reviewed; terminal states are never left.
    /// - [`RepositoryError::InvalidReviewStatus`] if the review carries
    ///   `Pending`.
    /// - [`RepositoryError::Database`] for infrastructure failures.
    fn review<'a>(
        &'a self,
        ticket_id: &'a TicketId,
        review: TicketReview,
        ctx: Option<AuditContext>,
    ) -> Pin<Box<dyn Future<Output = Result<Ticket, RepositoryError>> + Send + 'a>>;
}
