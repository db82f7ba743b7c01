//! In-memory message bus.

use std::collections::HashMap;
use std::sync::Mutex;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use waypost_core::bus::{BusError, MessageBus, MessageStream};
use waypost_core::envelope::Envelope;

type Subscriber = mpsc::UnboundedSender<Result<Envelope, BusError>>;

/// In-process [`MessageBus`] for tests.
///
/// Envelopes published to a topic are delivered synchronously to every
/// subscriber of that topic. Delivery is at-least-once in the same sense as
/// production: the bus never deduplicates, so publishing the same envelope
/// twice simulates broker redelivery.
///
/// Published envelopes are also recorded for assertions, whether or not
/// anyone was subscribed.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    published: Mutex<Vec<(String, Envelope)>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope published so far, with its topic.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock was poisoned by a panicking test.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Envelope)> {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.published.lock().unwrap().clone()
    }

    fn deliver(&self, topic: &str, envelope: &Envelope) {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(topic) {
            // Drop subscribers whose streams are gone.
            senders.retain(|tx| tx.send(Ok(envelope.clone())).is_ok());
        }
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), envelope.clone()));
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            self.deliver(&topic, &envelope);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
            let mut subscribers = self.subscribers.lock().unwrap();
            for topic in topics {
                subscribers
                    .entry((*topic).to_string())
                    .or_default()
                    .push(tx.clone());
            }
        }

        Box::pin(async move {
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
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use futures::StreamExt;
    use uuid::Uuid;
    use waypost_core::ticket::{OrganizationFeedback, TicketId, TicketPayload, TicketType};

    fn envelope() -> Envelope {
        let payload = TicketPayload::OrganizationFeedback(OrganizationFeedback {
            organization_id: Uuid::new_v4(),
            message: "hello".to_string(),
        });
        Envelope::submitted(
            TicketId::new(TicketType::OrganizationFeedback, 1),
            Uuid::new_v4(),
            "a@example.org".to_string(),
            &payload,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn subscriber_receives_published_envelope() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe(&["tickets"]).await.unwrap();

        let envelope = envelope();
        bus.publish("tickets", &envelope).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_recorded() {
        let bus = InMemoryBus::new();
        bus.publish("tickets", &envelope()).await.unwrap();
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_publish_delivers_twice() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe(&["tickets"]).await.unwrap();

        let envelope = envelope();
        bus.publish("tickets", &envelope).await.unwrap();
        bus.publish("tickets", &envelope).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), envelope);
        assert_eq!(stream.next().await.unwrap().unwrap(), envelope);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InMemoryBus::new();
        let mut other = bus.subscribe(&["other"]).await.unwrap();

        bus.publish("tickets", &envelope()).await.unwrap();

        // Nothing arrives on the unrelated topic.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), other.next())
                .await
                .is_err()
        );
    }
}
