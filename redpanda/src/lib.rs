//! Redpanda message bus implementation for Waypost.
//!
//! This crate provides the production [`MessageBus`]: a Kafka-compatible
//! producer/consumer pair built on rdkafka. Any Kafka-protocol broker works
//! (Redpanda, Apache Kafka, a managed equivalent); nothing here is vendor
//! specific beyond the protocol.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//!
//! - Offsets are committed only after an envelope has been handed to the
//!   subscriber's channel. A crash before commit means redelivery.
//! - Consumers must be idempotent; the pipeline keys idempotency on
//!   `ticket_id`.
//! - Messages are keyed by `ticket_id`, so redeliveries of one ticket's
//!   envelope stay on one partition. There is no ordering guarantee across
//!   distinct tickets, and the pipeline does not rely on one.
//!
//! # Visibility window
//!
//! A consumer that stalls is fenced out by the broker's poll-interval and
//! session timeouts, after which its partitions (and any uncommitted
//! message) move to another worker. Configure `max_poll_interval_ms` to
//! roughly six times the worst-case handling time so an in-flight message
//! is not leased to a second worker while the first is still working.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use waypost_core::bus::{BusError, MessageBus, MessageStream};
use waypost_core::envelope::Envelope;

/// Redpanda-backed [`MessageBus`].
///
/// # Configuration
///
/// Built through [`RedpandaBus::builder`]:
///
/// - **Broker addresses** (required)
/// - **Producer settings**: acks, compression, send timeout
/// - **Consumer group**: explicit id, or auto-generated from topics
/// - **Buffer size**: subscriber channel capacity (default: 1000)
/// - **Offset reset**: where new groups start reading (default: "latest")
/// - **Timeouts**: session and max-poll intervals for the visibility window
pub struct RedpandaBus {
    /// Kafka producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses (for creating consumers).
    brokers: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Consumer group id (if explicitly set).
    consumer_group: Option<String>,
    /// Envelope buffer size for subscribers.
    buffer_size: usize,
    /// Auto offset reset policy.
    auto_offset_reset: String,
    /// Consumer session timeout in milliseconds.
    session_timeout_ms: u32,
    /// Max poll interval in milliseconds (the visibility window).
    max_poll_interval_ms: u32,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker addresses.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// The configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaBus`].
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    session_timeout_ms: Option<u32>,
    max_poll_interval_ms: Option<u32>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "all". A submission is only reported accepted once the
    /// broker has durably taken the envelope.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group id for subscriptions.
    ///
    /// Multiple workers sharing a group id split the queue between them.
    /// If not set, a group id is generated from the sorted topic list.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the envelope buffer size for subscriptions (default: 1000).
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// "earliest", "latest", or "error". Default: "earliest" so a newly
    /// deployed worker group drains the backlog rather than skipping it.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer session timeout in milliseconds (default: 45000).
    #[must_use]
    pub const fn session_timeout_ms(mut self, ms: u32) -> Self {
        self.session_timeout_ms = Some(ms);
        self
    }

    /// Set the max poll interval in milliseconds (default: 300000).
    ///
    /// This is the visibility window: a worker that does not poll within it
    /// is fenced out and its in-flight message is redelivered elsewhere.
    /// Size it to about six times the worst-case handling time.
    #[must_use]
    pub const fn max_poll_interval_ms(mut self, ms: u32) -> Self {
        self.max_poll_interval_ms = Some(ms);
        self
    }

    /// Build the [`RedpandaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            "RedpandaBus created"
        );

        Ok(RedpandaBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            session_timeout_ms: self.session_timeout_ms.unwrap_or(45_000),
            max_poll_interval_ms: self.max_poll_interval_ms.unwrap_or(300_000),
        })
    }
}

impl MessageBus for RedpandaBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        // Clone data before moving into the async block.
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope
                .to_bytes()
                .map_err(|e| BusError::PublishFailed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            // Key by ticket_id: redeliveries of the same ticket stay on the
            // same partition.
            let key = envelope.ticket_id.as_str().as_bytes().to_vec();
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_type = %envelope.event_type,
                        ticket_id = %envelope.ticket_id,
                        "Envelope published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        ticket_id = %envelope.ticket_id,
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        // Clone configuration before moving into the async block.
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let session_timeout_ms = self.session_timeout_ms;
        let max_poll_interval_ms = self.max_poll_interval_ms;

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("waypost-{}", sorted_topics.join("-"))
            });

            // Manual commits give at-least-once delivery: an envelope is
            // committed only after it reached the subscriber channel.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", session_timeout_ms.to_string())
                .set("max.poll.interval.ms", max_poll_interval_ms.to_string())
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size = buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The spawned task owns the consumer and forwards envelopes.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let envelope_result = match message.payload() {
                                Some(payload) => Envelope::from_bytes(payload)
                                    .map_err(|e| BusError::DeserializationFailed(e.to_string())),
                                None => Err(BusError::DeserializationFailed(
                                    "Message has no payload".to_string(),
                                )),
                            };

                            if let Ok(envelope) = &envelope_result {
                                tracing::trace!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    ticket_id = %envelope.ticket_id,
                                    "Received envelope"
                                );
                            }

                            // Commit only AFTER the handoff succeeds. If the
                            // receiver is gone we exit without committing and
                            // the message is redelivered to another worker.
                            if tx.send(envelope_result).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err =
                                BusError::Transport(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBus>();
        assert_sync::<RedpandaBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(matches!(
            RedpandaBus::builder().build(),
            Err(BusError::ConnectionFailed(_))
        ));
    }
}
