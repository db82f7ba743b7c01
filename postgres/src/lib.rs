//! PostgreSQL implementations for Waypost: ticket storage, audit capture,
//! audit queries, and the dead-letter store.
//!
//! Everything here runs on sqlx with runtime-bound queries and a shared
//! connection pool. The schema ships as embedded migrations; run them with
//! [`tickets::PostgresTicketRepository::migrate`] at startup.
//!
//! # Atomicity
//!
//! Mutations to audited tables go through [`audit::AuditedTransaction`]:
//! the row change and its audit record are one transaction. See the
//! `audit` module for the capture design and the identity scoping rules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod audit_query;
pub mod dead_letter;
pub mod organizations;
pub mod tickets;

pub use audit::{AUDITED_TABLES, AuditedTransaction};
pub use audit_query::{AuditPage, AuditQuery, AuditQueryService};
pub use dead_letter::PostgresDeadLetters;
pub use organizations::{Organization, OrganizationUpdate, PostgresOrganizationRepository};
pub use tickets::PostgresTicketRepository;
