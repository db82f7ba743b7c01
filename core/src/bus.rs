//! Message bus abstraction for the submission pipeline.
//!
//! This module provides the [`MessageBus`] trait for publishing and
//! subscribing to ticket submission envelopes. The gateway publishes, the
//! processor subscribes; neither knows which broker sits in between.
//!
//! ```text
//! ┌──────────┐   publish    ┌─────────────┐   subscribe   ┌───────────┐
//! │ Gateway  │ ───────────► │ MessageBus  │ ────────────► │ Processor │
//! └──────────┘              └─────────────┘               └───────────┘
//! ```
//!
//! # Delivery guarantees
//!
//! - **At-least-once**: an envelope may be delivered more than once.
//!   Consumers are idempotent on `ticket_id`.
//! - **No cross-ticket ordering**: envelopes for distinct tickets may arrive
//!   in any order.
//!
//! # Implementations
//!
//! - `RedpandaBus` (`waypost-redpanda`): production, Kafka-compatible.
//! - `InMemoryBus` (`waypost-testing`): fast, deterministic, in-process.

use crate::envelope::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an envelope to a topic.
    ///
    /// The gateway surfaces this to its caller so the submission can be
    /// retried explicitly.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A delivered message could not be decoded as an envelope.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Stream of envelopes from a subscription.
///
/// Each item is a `Result`: broker-side decode and transport errors surface
/// in-stream so a consumer can log them and keep draining.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Envelope, BusError>> + Send>>;

/// Publish/subscribe abstraction over the event bus and its durable queues.
///
/// # Design
///
/// - **Async-first**: all operations are async for non-blocking I/O.
/// - **At-least-once**: subscribers must tolerate duplicate deliveries.
/// - **Dyn compatibility**: methods return `Pin<Box<dyn Future>>` instead of
///   `async fn` so the bus can be held as `Arc<dyn MessageBus>` by the
///   gateway and consumer alike.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the gateway and any number of
/// consumer workers share one instance.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// Publishing is the durability handoff: once this returns `Ok`, the
    /// submission is accepted and will eventually be processed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker did not accept the
    /// envelope. The caller may retry; the envelope has not been consumed.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of envelopes.
    ///
    /// Implementations typically use consumer groups so multiple workers
    /// share the load; each message is leased to one worker at a time, and a
    /// worker that stalls past the visibility window causes redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription could
    /// not be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}
