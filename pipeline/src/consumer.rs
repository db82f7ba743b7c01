//! Event bus consumer with a bounded retry budget and dead-letter diversion.
//!
//! The consumer runs a subscribe-process-reconnect loop:
//!
//! ```text
//! loop {
//!     subscribe
//!     for each envelope {
//!         attempt up to max_attempts:
//!             dispatch -> Ok        => done (acknowledge)
//!                      -> Permanent => dead-letter now, acknowledge
//!                      -> Transient => retry after delay
//!         budget exhausted          => dead-letter, acknowledge
//!     }
//!     on stream end or subscribe failure: wait and reconnect
//! }
//! ```
//!
//! Redelivery of an already-processed envelope (broker at-least-once, or a
//! worker fenced out mid-flight) is harmless: every handler is idempotent
//! on `ticket_id`.

use crate::processor::HandlerRegistry;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use waypost_core::bus::MessageBus;
use waypost_core::dead_letter::DeadLetterStore;
use waypost_core::envelope::Envelope;

/// Default number of delivery attempts before dead-lettering.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Consumer worker draining submission topics.
///
/// Spawn any number of these against the same consumer group; the broker
/// splits the queue between them.
pub struct TicketConsumer {
    /// Consumer name (for logging and monitoring).
    name: String,
    /// Topics to subscribe to.
    topics: Vec<String>,
    /// Bus to consume from.
    bus: Arc<dyn MessageBus>,
    /// Dispatch table.
    registry: Arc<HandlerRegistry>,
    /// Destination for envelopes the budget gave up on.
    dead_letters: Arc<dyn DeadLetterStore>,
    /// Shutdown signal receiver.
    shutdown: broadcast::Receiver<()>,
    /// Delivery attempts per envelope before dead-lettering.
    max_attempts: u32,
    /// Delay between transient-failure attempts, and before reconnects.
    retry_delay: Duration,
}

impl TicketConsumer {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> TicketConsumerBuilder {
        TicketConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(&mut self) {
        info!(
            consumer = %self.name,
            handlers = ?self.registry.registered_types(),
            "Ticket consumer started"
        );

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Ticket consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "Subscribed to bus");
                            if self.process_stream(&mut stream).await.is_break() {
                                break;
                            }
                            warn!(
                                consumer = %self.name,
                                "Stream ended, reconnecting in {:?}", self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe, retrying in {:?}", self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "Ticket consumer stopped");
    }

    /// Drain the stream until it ends (Continue) or shutdown (Break).
    async fn process_stream(
        &mut self,
        stream: &mut waypost_core::bus::MessageStream,
    ) -> std::ops::ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown during processing");
                    return std::ops::ControlFlow::Break(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(envelope)) => self.process_envelope(&envelope).await,
                        Some(Err(e)) => {
                            // Transport or decode trouble at the bus layer;
                            // log and keep draining.
                            error!(consumer = %self.name, error = %e, "Bus stream error");
                        }
                        None => return std::ops::ControlFlow::Continue(()),
                    }
                }
            }
        }
    }

    /// Process one envelope to completion: success, or dead-lettered.
    ///
    /// Returning at all acknowledges the message; an envelope is never left
    /// in limbo. Exactly `max_attempts` dispatches happen for an envelope
    /// that keeps failing transiently; a permanent failure stops the budget
    /// early.
    pub async fn process_envelope(&self, envelope: &Envelope) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.registry.dispatch(envelope).await {
                Ok(()) => return,
                Err(e) if e.is_permanent() => {
                    warn!(
                        consumer = %self.name,
                        ticket_id = %envelope.ticket_id,
                        error = %e,
                        attempt = attempt,
                        "Permanent failure, dead-lettering without further retries"
                    );
                    self.dead_letter(envelope, &e.to_string(), attempt).await;
                    return;
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!(
                        consumer = %self.name,
                        ticket_id = %envelope.ticket_id,
                        error = %e,
                        attempts = attempt,
                        "Retry budget exhausted, dead-lettering"
                    );
                    self.dead_letter(envelope, &e.to_string(), attempt).await;
                    return;
                }
                Err(e) => {
                    warn!(
                        consumer = %self.name,
                        ticket_id = %envelope.ticket_id,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn dead_letter(&self, envelope: &Envelope, error_message: &str, attempts: u32) {
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);
        if let Err(e) = self
            .dead_letters
            .add_entry(envelope, error_message, None, attempts)
            .await
        {
            // Nothing else to do: the envelope is acknowledged either way,
            // so losing this write loses the message. Make it loud.
            error!(
                consumer = %self.name,
                ticket_id = %envelope.ticket_id,
                error = %e,
                "FAILED TO DEAD-LETTER ENVELOPE; manual recovery needed"
            );
        }
    }
}

/// Builder for configuring a [`TicketConsumer`].
#[derive(Default)]
pub struct TicketConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    bus: Option<Arc<dyn MessageBus>>,
    registry: Option<Arc<HandlerRegistry>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    shutdown: Option<broadcast::Receiver<()>>,
    max_attempts: Option<u32>,
    retry_delay: Option<Duration>,
}

impl TicketConsumerBuilder {
    /// Set the consumer name (for logging).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set the message bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the handler registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the dead-letter store.
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Set the shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the per-envelope attempt budget (default: 3).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the retry/reconnect delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the [`TicketConsumer`].
    ///
    /// # Errors
    ///
    /// Returns a message naming the first missing required field.
    pub fn build(self) -> Result<TicketConsumer, String> {
        Ok(TicketConsumer {
            name: self.name.unwrap_or_else(|| "tickets".to_string()),
            topics: self.topics.ok_or("topics are required")?,
            bus: self.bus.ok_or("bus is required")?,
            registry: self.registry.ok_or("registry is required")?,
            dead_letters: self.dead_letters.ok_or("dead_letters is required")?,
            shutdown: self.shutdown.ok_or("shutdown is required")?,
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            retry_delay: self.retry_delay.unwrap_or_else(|| Duration::from_secs(5)),
        })
    }
}
