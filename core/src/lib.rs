//! # Waypost Core
//!
//! Core traits and types for the Waypost ticket pipeline and audit engine.
//!
//! This crate defines the contracts that the rest of the workspace implements:
//!
//! - **Tickets**: user-submitted items (access requests, organization
//!   suggestions, organization feedback) that are processed asynchronously
//!   and eventually reviewed by an admin.
//! - **Envelope**: the JSON message published to the bus when a ticket is
//!   submitted. Delivered at-least-once; `ticket_id` is the idempotency key.
//! - **[`bus::MessageBus`]**: publish/subscribe abstraction. Backed by
//!   Redpanda in production (`waypost-redpanda`) and an in-process bus in
//!   tests (`waypost-testing`).
//! - **[`repository::TicketRepository`]**: durable ticket storage with
//!   idempotent insert semantics.
//! - **[`dead_letter::DeadLetterStore`]**: holding area for envelopes that
//!   exhausted their retry budget.
//! - **[`audit`]**: context propagation, row diff computation, and read-time
//!   redaction for the audit trail.
//!
//! ## Architecture Principles
//!
//! - At-least-once delivery at the transport, exactly-once *effect* through
//!   idempotent handlers keyed on `ticket_id`.
//! - Audit records are written in the same transaction as the mutation they
//!   describe. Both commit or both roll back.
//! - Dependencies are abstracted behind traits so unit tests run against
//!   in-process implementations.

pub mod audit;
pub mod bus;
pub mod clock;
pub mod dead_letter;
pub mod envelope;
pub mod notify;
pub mod repository;
pub mod ticket;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
