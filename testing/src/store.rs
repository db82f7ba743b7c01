//! In-memory ticket repository and dead-letter store.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use waypost_core::audit::diff::changed_fields;
use waypost_core::audit::{AuditAction, AuditContext, AuditRecord, AuditSource};
use waypost_core::dead_letter::{DeadLetter, DeadLetterStatus, DeadLetterStore};
use waypost_core::envelope::Envelope;
use waypost_core::repository::{InsertOutcome, RepositoryError, TicketRepository, TicketReview};
use waypost_core::ticket::{Ticket, TicketId, TicketStatus, TicketType};

fn snapshot(ticket: &Ticket) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(ticket).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

/// In-memory [`TicketRepository`].
///
/// Mirrors the Postgres implementation's semantics: `ticket_id` uniqueness
/// is the idempotency source of truth, every mutation appends to an
/// in-memory audit log "in the same transaction" (the mutation and its
/// record happen under one lock, and a failed mutation records nothing),
/// and status transitions are one-way.
///
/// `fail_next_inserts` injects transient database failures for retry tests.
#[derive(Default)]
pub struct InMemoryTicketStore {
    inner: Mutex<Inner>,
    fail_inserts: AtomicBool,
}

#[derive(Default)]
struct Inner {
    tickets: HashMap<String, Ticket>,
    sequences: HashMap<TicketType, u64>,
    audit_log: Vec<AuditRecord>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `fail` is set, insert attempts return a database error until
    /// cleared. Used to simulate a transient outage.
    pub fn fail_next_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored tickets.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock was poisoned by a panicking test.
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.inner.lock().unwrap().tickets.len()
    }

    /// Snapshot of the audit log.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock was poisoned by a panicking test.
    #[must_use]
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.inner.lock().unwrap().audit_log.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.inner.lock().unwrap()
    }
}

impl TicketRepository for InMemoryTicketStore {
    fn next_sequence(
        &self,
        ticket_type: TicketType,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + '_>> {
        let value = {
            let mut inner = self.lock();
            let entry = inner.sequences.entry(ticket_type).or_insert(0);
            *entry += 1;
            *entry
        };
        Box::pin(async move { Ok(value) })
    }

    fn insert_if_absent<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(RepositoryError::Database(
                    "injected failure: connection refused".to_string(),
                ));
            }

            let new_values = snapshot(ticket)?;
            let mut inner = self.lock();
            if inner.tickets.contains_key(ticket.ticket_id.as_str()) {
                return Ok(InsertOutcome::Duplicate);
            }

            let record_id = inner.audit_log.len() as i64 + 1;
            inner
                .tickets
                .insert(ticket.ticket_id.as_str().to_string(), ticket.clone());
            // Same "transaction": the row and its audit record land together
            // under the lock, attributed to the submitter.
            inner.audit_log.push(AuditRecord {
                id: record_id,
                timestamp: Utc::now(),
                table_name: "tickets".to_string(),
                record_id: ticket.id.to_string(),
                action: AuditAction::Insert,
                user_id: Some(ticket.submitter_id.to_string()),
                request_id: Some(ticket.ticket_id.to_string()),
                old_values: None,
                new_values: Some(new_values),
                changed_fields: None,
                source: AuditSource::Application,
            });
            Ok(InsertOutcome::Inserted)
        })
    }

    fn get<'a>(
        &'a self,
        ticket_id: &'a TicketId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Ticket>, RepositoryError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.lock().tickets.get(ticket_id.as_str()).cloned()) })
    }

    fn review<'a>(
        &'a self,
        ticket_id: &'a TicketId,
        review: TicketReview,
        ctx: Option<AuditContext>,
    ) -> Pin<Box<dyn Future<Output = Result<Ticket, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            if !matches!(review.status, TicketStatus::Approved | TicketStatus::Rejected) {
                return Err(RepositoryError::InvalidReviewStatus(review.status));
            }

            let mut inner = self.lock();
            let Some(existing) = inner.tickets.get(ticket_id.as_str()).cloned() else {
                return Err(RepositoryError::NotFound(ticket_id.clone()));
            };
            if existing.status.is_terminal() {
                return Err(RepositoryError::TerminalStatus {
                    ticket_id: ticket_id.clone(),
                    status: existing.status,
                });
            }

            let mut updated = existing.clone();
            updated.status = review.status;
            updated.reviewed_at = Some(Utc::now());
            updated.reviewed_by = Some(review.reviewed_by);
            updated.admin_notes = review.admin_notes;

            let old_values = snapshot(&existing)?;
            let new_values = snapshot(&updated)?;
            let fields = changed_fields(&old_values, &new_values);

            let record_id = inner.audit_log.len() as i64 + 1;
            inner
                .tickets
                .insert(ticket_id.as_str().to_string(), updated.clone());
            inner.audit_log.push(AuditRecord {
                id: record_id,
                timestamp: Utc::now(),
                table_name: "tickets".to_string(),
                record_id: updated.id.to_string(),
                action: AuditAction::Update,
                user_id: ctx.as_ref().map(|c| c.user_id.clone()),
                request_id: ctx.as_ref().map(|c| c.request_id.clone()),
                old_values: Some(old_values),
                new_values: Some(new_values),
                changed_fields: Some(fields),
                source: AuditSource::Application,
            });
            Ok(updated)
        })
    }
}

/// In-memory [`DeadLetterStore`].
#[derive(Default)]
pub struct InMemoryDeadLetters {
    entries: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock was poisoned by a panicking test.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
        self.entries.lock().unwrap().clone()
    }
}

impl DeadLetterStore for InMemoryDeadLetters {
    fn add_entry<'a>(
        &'a self,
        envelope: &'a Envelope,
        error_message: &'a str,
        error_details: Option<&'a str>,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
            let mut entries = self.entries.lock().unwrap();
            let id = entries.len() as i64 + 1;
            let now = Utc::now();
            entries.push(DeadLetter {
                id,
                envelope: envelope.clone(),
                error_message: error_message.to_string(),
                error_details: error_details.map(ToString::to_string),
                attempts,
                first_failed_at: now,
                last_failed_at: now,
                status: DeadLetterStatus::Pending,
                resolved_at: None,
                resolved_by: None,
                resolution_notes: None,
            });
            Ok(id)
        })
    }

    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)] // Lock poisoning only follows a prior test panic
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .filter(|e| e.status == DeadLetterStatus::Pending)
                .count() as i64)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use uuid::Uuid;
    use waypost_core::ticket::{OrganizationFeedback, TicketPayload};

    fn ticket(seq: u64) -> Ticket {
        Ticket::submitted(
            TicketId::new(TicketType::OrganizationFeedback, seq),
            Uuid::new_v4(),
            "a@example.org".to_string(),
            TicketPayload::OrganizationFeedback(OrganizationFeedback {
                organization_id: Uuid::new_v4(),
                message: "note".to_string(),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = InMemoryTicketStore::new();
        let ticket = ticket(1);

        assert_eq!(
            store.insert_if_absent(&ticket).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_if_absent(&ticket).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.ticket_count(), 1);
        // Exactly one audit record: the duplicate wrote nothing.
        assert_eq!(store.audit_records().len(), 1);
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_audit_record() {
        let store = InMemoryTicketStore::new();
        store.fail_next_inserts(true);
        assert!(store.insert_if_absent(&ticket(1)).await.is_err());
        assert_eq!(store.ticket_count(), 0);
        assert!(store.audit_records().is_empty());
    }

    #[tokio::test]
    async fn review_is_audited_and_one_way() {
        let store = InMemoryTicketStore::new();
        let ticket = ticket(1);
        store.insert_if_absent(&ticket).await.unwrap();

        let reviewed = store
            .review(
                &ticket.ticket_id,
                TicketReview {
                    status: TicketStatus::Approved,
                    reviewed_by: "admin".to_string(),
                    admin_notes: None,
                },
                Some(AuditContext::new("u1", "r1")),
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, TicketStatus::Approved);

        let records = store.audit_records();
        assert_eq!(records.len(), 2);
        let update = &records[1];
        assert_eq!(update.action, AuditAction::Update);
        assert_eq!(update.user_id.as_deref(), Some("u1"));
        let fields = update.changed_fields.clone().unwrap();
        assert!(fields.contains(&"status".to_string()));

        // Terminal status never transitions again.
        let err = store
            .review(
                &ticket.ticket_id,
                TicketReview {
                    status: TicketStatus::Rejected,
                    reviewed_by: "admin".to_string(),
                    admin_notes: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::TerminalStatus { .. }));
    }

    #[tokio::test]
    async fn sequences_are_unique_per_type() {
        let store = InMemoryTicketStore::new();
        let a = store.next_sequence(TicketType::AccessRequest).await.unwrap();
        let b = store.next_sequence(TicketType::AccessRequest).await.unwrap();
        let s = store
            .next_sequence(TicketType::OrganizationSuggestion)
            .await
            .unwrap();
        assert_eq!((a, b, s), (1, 2, 1));
    }
}
