//! # Waypost Pipeline
//!
//! The application layer of the ticket system: the submission gateway
//! (producer), the ticket processor (consumer-side dispatch and idempotent
//! handling), the consumer runtime with its retry budget and dead-letter
//! diversion, and the worker wiring.
//!
//! ```text
//! ┌─────────┐   ┌─────────────┐   ┌──────────┐   ┌───────────┐
//! │ Gateway │──►│ MessageBus  │──►│ Consumer │──►│ Processor │
//! └─────────┘   └─────────────┘   └────┬─────┘   └─────┬─────┘
//!                                      │               │ insert (audited)
//!                             budget   │               ▼
//!                             spent?   │         ┌───────────┐
//!                                      ▼         │ Postgres  │
//!                               ┌─────────────┐  └───────────┘
//!                               │ Dead letter │
//!                               │   store     │──► alert (gauge + warn)
//!                               └─────────────┘
//! ```
//!
//! HTTP routing and authentication live upstream; this crate starts from a
//! validated submitter identity and a typed payload.

pub mod config;
pub mod consumer;
pub mod gateway;
pub mod monitor;
pub mod notify;
pub mod processor;

pub use config::Config;
pub use consumer::{DEFAULT_MAX_ATTEMPTS, TicketConsumer};
pub use gateway::{Accepted, GatewayError, NewTicket, SubmissionGateway};
pub use monitor::spawn_dlq_monitor;
pub use notify::TracingNotifier;
pub use processor::{
    HandlerRegistry, ProcessError, SubmittedTicketHandler, TicketHandler, builtin_registry,
};
