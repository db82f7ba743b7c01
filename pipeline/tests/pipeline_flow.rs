//! End-to-end pipeline tests over the in-process bus and stores.
//!
//! These exercise the real gateway, registry, handler, and consumer code
//! paths; only the transport and storage are in-memory doubles.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;
use waypost_core::bus::MessageBus;
use waypost_core::envelope::Envelope;
use waypost_core::notify::Notifier;
use waypost_core::repository::TicketRepository;
use waypost_core::ticket::{
    OrganizationSuggestion, TicketId, TicketPayload, TicketStatus, TicketType,
};
use waypost_pipeline::{
    HandlerRegistry, NewTicket, ProcessError, SubmissionGateway, TicketConsumer, TicketHandler,
    builtin_registry,
};
use waypost_testing::{
    FailingNotifier, InMemoryBus, InMemoryDeadLetters, InMemoryTicketStore, RecordingNotifier,
    test_clock,
};

const TOPIC: &str = "waypost-ticket-events";

fn suggestion() -> TicketPayload {
    TicketPayload::OrganizationSuggestion(OrganizationSuggestion {
        name: "Corner Cafe".to_string(),
        latitude: 48.8566,
        longitude: 2.3522,
        address: Some("1 Rue de Rivoli".to_string()),
        website: None,
        description: None,
    })
}

fn submission() -> NewTicket {
    NewTicket {
        submitter_id: Uuid::new_v4(),
        submitter_email: "ada@example.org".to_string(),
        payload: suggestion(),
    }
}

struct Harness {
    bus: Arc<InMemoryBus>,
    store: Arc<InMemoryTicketStore>,
    dead_letters: Arc<InMemoryDeadLetters>,
    notifier: Arc<RecordingNotifier>,
    gateway: SubmissionGateway,
    shutdown: broadcast::Sender<()>,
}

impl Harness {
    fn new() -> Self {
        Self::with_notifier(Arc::new(RecordingNotifier::new()))
    }

    fn with_notifier(notifier: Arc<RecordingNotifier>) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(InMemoryTicketStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let gateway = SubmissionGateway::new(
            store.clone(),
            bus.clone(),
            Arc::new(test_clock()),
            TOPIC,
        );
        let (shutdown, _) = broadcast::channel(1);
        Self {
            bus,
            store,
            dead_letters,
            notifier,
            gateway,
            shutdown,
        }
    }

    fn consumer(&self, notifier: Arc<dyn Notifier>, max_attempts: u32) -> TicketConsumer {
        let registry = builtin_registry(self.store.clone(), notifier, Arc::new(test_clock()));
        TicketConsumer::builder()
            .name("test-worker")
            .topics(vec![TOPIC.to_string()])
            .bus(self.bus.clone())
            .registry(Arc::new(registry))
            .dead_letters(self.dead_letters.clone())
            .shutdown(self.shutdown.subscribe())
            .max_attempts(max_attempts)
            .retry_delay(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    fn consumer_with_registry(&self, registry: HandlerRegistry, max_attempts: u32) -> TicketConsumer {
        TicketConsumer::builder()
            .name("test-worker")
            .topics(vec![TOPIC.to_string()])
            .bus(self.bus.clone())
            .registry(Arc::new(registry))
            .dead_letters(self.dead_letters.clone())
            .shutdown(self.shutdown.subscribe())
            .max_attempts(max_attempts)
            .retry_delay(Duration::from_millis(1))
            .build()
            .unwrap()
    }
}

// Scenario: submit a suggestion, consume it, find the pending row.
#[tokio::test]
async fn submit_consume_store_roundtrip() {
    let harness = Harness::new();
    let consumer = harness.consumer(harness.notifier.clone(), 3);
    let handle = consumer.spawn();

    // Give the consumer a moment to subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let accepted = harness.gateway.submit(submission()).await.unwrap();
    assert_eq!(accepted.ticket_id.as_str(), "S00001");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let ticket = harness
        .store
        .get(&accepted.ticket_id)
        .await
        .unwrap()
        .expect("ticket stored");
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(ticket.ticket_type(), TicketType::OrganizationSuggestion);
    assert_eq!(harness.notifier.sent(), vec![accepted.ticket_id]);

    harness.shutdown.send(()).unwrap();
    handle.await.unwrap();
}

// Scenario: the same envelope delivered twice (at-least-once transport)
// results in one row and one notification; both deliveries acknowledge.
#[tokio::test]
async fn duplicate_delivery_is_a_harmless_noop() {
    let harness = Harness::new();
    let consumer = harness.consumer(harness.notifier.clone(), 3);

    let accepted = harness.gateway.submit(submission()).await.unwrap();
    let envelope = harness.bus.published()[0].1.clone();

    consumer.process_envelope(&envelope).await;
    consumer.process_envelope(&envelope).await;

    assert_eq!(harness.store.ticket_count(), 1);
    assert_eq!(harness.notifier.sent(), vec![accepted.ticket_id]);
    assert!(harness.dead_letters.entries().is_empty());
}

// Scenario: the insert succeeds but the notification dependency raises.
// The message is still acknowledged and nothing is retried or diverted.
#[tokio::test]
async fn notification_failure_never_fails_the_message() {
    let harness = Harness::new();
    let consumer = harness.consumer(Arc::new(FailingNotifier::new()), 3);

    let accepted = harness.gateway.submit(submission()).await.unwrap();
    let envelope = harness.bus.published()[0].1.clone();

    consumer.process_envelope(&envelope).await;

    assert!(
        harness
            .store
            .get(&accepted.ticket_id)
            .await
            .unwrap()
            .is_some()
    );
    assert!(harness.dead_letters.entries().is_empty());

    // A redelivery after the notification failure is still a no-op.
    consumer.process_envelope(&envelope).await;
    assert_eq!(harness.store.ticket_count(), 1);
}

struct AlwaysTransient {
    calls: AtomicU32,
}

#[async_trait]
impl TicketHandler for AlwaysTransient {
    async fn handle(&self, _envelope: &Envelope) -> Result<(), ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProcessError::Transient("database unavailable".to_string()))
    }
}

// Property: a message failing transiently on every attempt is dead-lettered
// after exactly the configured budget, never more.
#[tokio::test]
async fn transient_failures_exhaust_budget_into_dead_letters() {
    let harness = Harness::new();
    let handler = Arc::new(AlwaysTransient {
        calls: AtomicU32::new(0),
    });
    let mut registry = HandlerRegistry::new();
    registry.register(
        TicketType::OrganizationSuggestion.event_type(),
        handler.clone(),
    );
    let consumer = harness.consumer_with_registry(registry, 3);

    harness.gateway.submit(submission()).await.unwrap();
    let envelope = harness.bus.published()[0].1.clone();

    consumer.process_envelope(&envelope).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    let entries = harness.dead_letters.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 3);
    assert_eq!(entries[0].envelope, envelope);
}

// A malformed payload can never succeed: it skips the retry budget and is
// diverted on the first attempt.
#[tokio::test]
async fn permanent_failure_diverts_without_retries() {
    let harness = Harness::new();
    let consumer = harness.consumer(harness.notifier.clone(), 3);

    let envelope = Envelope {
        event_type: TicketType::OrganizationSuggestion.event_type(),
        ticket_id: TicketId::new(TicketType::OrganizationSuggestion, 7),
        submitter_id: Uuid::new_v4(),
        submitter_email: "ada@example.org".to_string(),
        payload: serde_json::json!({"bogus": true}),
    };

    consumer.process_envelope(&envelope).await;

    let entries = harness.dead_letters.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 1);
    assert_eq!(harness.store.ticket_count(), 0);
}

#[tokio::test]
async fn unregistered_event_type_is_dead_lettered() {
    let harness = Harness::new();
    let consumer = harness.consumer(harness.notifier.clone(), 3);

    let envelope = Envelope {
        event_type: "road_closure.submitted".to_string(),
        ticket_id: TicketId::new(TicketType::AccessRequest, 9),
        submitter_id: Uuid::new_v4(),
        submitter_email: "ada@example.org".to_string(),
        payload: serde_json::json!({}),
    };
    consumer.process_envelope(&envelope).await;

    let entries = harness.dead_letters.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 1);
}

// Property: concurrent submissions of one type each get a unique id.
#[tokio::test]
async fn concurrent_submissions_get_unique_ids() {
    let harness = Harness::new();
    let gateway = Arc::new(harness.gateway);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway.submit(submission()).await.unwrap().ticket_id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    let total = ids.len();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), total);
}

#[tokio::test]
async fn validation_failures_never_reach_the_bus() {
    let harness = Harness::new();
    let invalid = NewTicket {
        submitter_id: Uuid::new_v4(),
        submitter_email: "not-an-email".to_string(),
        payload: TicketPayload::OrganizationSuggestion(OrganizationSuggestion {
            name: String::new(),
            latitude: 123.0,
            longitude: 2.3522,
            address: None,
            website: None,
            description: None,
        }),
    };

    let err = harness.gateway.submit(invalid).await.unwrap_err();
    match err {
        waypost_pipeline::GatewayError::Validation(errors) => {
            let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
            assert_eq!(fields, vec!["submitter_email", "name", "latitude"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(harness.bus.published().is_empty());
}

struct RefusingBus;

impl MessageBus for RefusingBus {
    fn publish(
        &self,
        topic: &str,
        _envelope: &Envelope,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), waypost_core::bus::BusError>> + Send + '_>,
    > {
        let topic = topic.to_string();
        Box::pin(async move {
            Err(waypost_core::bus::BusError::PublishFailed {
                topic,
                reason: "broker unavailable".to_string(),
            })
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<
                    Output = Result<waypost_core::bus::MessageStream, waypost_core::bus::BusError>,
                > + Send
                + '_,
        >,
    > {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        Box::pin(async move {
            Err(waypost_core::bus::BusError::SubscriptionFailed {
                topics,
                reason: "broker unavailable".to_string(),
            })
        })
    }
}

// Publish failure surfaces to the caller; a later retry draws a fresh id
// rather than reusing the abandoned one.
#[tokio::test]
async fn publish_failure_surfaces_and_ids_are_not_reused() {
    let store = Arc::new(InMemoryTicketStore::new());
    let clock = Arc::new(test_clock());

    let refused = SubmissionGateway::new(store.clone(), Arc::new(RefusingBus), clock.clone(), TOPIC);
    let err = refused.submit(submission()).await.unwrap_err();
    assert!(matches!(err, waypost_pipeline::GatewayError::Publish(_)));

    // The caller retries against a recovered broker; the sequence moved on.
    let bus = Arc::new(InMemoryBus::new());
    let gateway = SubmissionGateway::new(store, bus, clock, TOPIC);
    let accepted = gateway.submit(submission()).await.unwrap();
    assert_eq!(accepted.ticket_id.as_str(), "S00002");
}
