//! PostgreSQL ticket repository.
//!
//! The `UNIQUE` constraint on `tickets.ticket_id` is the single source of
//! truth for pipeline idempotency: a violation on insert means the ticket
//! was already processed and maps to [`InsertOutcome::Duplicate`].
//!
//! Every mutation runs through an [`AuditedTransaction`], so the ticket row
//! and its audit record commit together or not at all.

use crate::audit::AuditedTransaction;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use waypost_core::audit::{AuditAction, AuditContext, AuditError};
use waypost_core::repository::{InsertOutcome, RepositoryError, TicketRepository, TicketReview};
use waypost_core::ticket::{Ticket, TicketId, TicketPayload, TicketStatus, TicketType};

fn audit_err(e: AuditError) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

pub(crate) fn row_to_ticket(row: &PgRow) -> Result<Ticket, RepositoryError> {
    let ticket_id: String = row.try_get("ticket_id").map_err(db_err)?;
    let ticket_id = TicketId::parse(&ticket_id)
        .ok_or_else(|| RepositoryError::Serialization(format!("bad ticket_id: {ticket_id}")))?;

    let ticket_type: String = row.try_get("ticket_type").map_err(db_err)?;
    let ticket_type = TicketType::parse(&ticket_type)
        .ok_or_else(|| RepositoryError::Serialization(format!("bad ticket_type: {ticket_type}")))?;

    let payload: serde_json::Value = row.try_get("payload").map_err(db_err)?;
    let payload = TicketPayload::from_value(ticket_type, payload)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let status: String = row.try_get("status").map_err(db_err)?;
    let status = TicketStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Serialization(format!("bad status: {status}")))?;

    Ok(Ticket {
        id: row.try_get("id").map_err(db_err)?,
        ticket_id,
        submitter_id: row.try_get("submitter_id").map_err(db_err)?,
        submitter_email: row.try_get("submitter_email").map_err(db_err)?,
        payload,
        status,
        created_at: row.try_get("created_at").map_err(db_err)?,
        reviewed_at: row.try_get("reviewed_at").map_err(db_err)?,
        reviewed_by: row.try_get("reviewed_by").map_err(db_err)?,
        admin_notes: row.try_get("admin_notes").map_err(db_err)?,
    })
}

const TICKET_COLUMNS: &str = "id, ticket_id, ticket_type, submitter_id, submitter_email, \
     payload, status, created_at, reviewed_at, reviewed_by, admin_notes";

/// PostgreSQL-backed [`TicketRepository`].
#[derive(Clone)]
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    /// Create a repository over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn snapshot(
        scope: &mut AuditedTransaction,
        ticket_id: &TicketId,
        for_update: bool,
    ) -> Result<Option<serde_json::Value>, RepositoryError> {
        let sql = if for_update {
            "SELECT to_jsonb(tickets) FROM tickets WHERE ticket_id = $1 FOR UPDATE"
        } else {
            "SELECT to_jsonb(tickets) FROM tickets WHERE ticket_id = $1"
        };
        sqlx::query_scalar(sql)
            .bind(ticket_id.as_str())
            .fetch_optional(scope.conn())
            .await
            .map_err(db_err)
    }
}

impl TicketRepository for PostgresTicketRepository {
    fn next_sequence(
        &self,
        ticket_type: TicketType,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            // Single-statement upsert: atomic under concurrent submissions,
            // whether from the same or different users.
            let value: i64 = sqlx::query_scalar(
                r"
                INSERT INTO ticket_sequences (ticket_type, value)
                VALUES ($1, 1)
                ON CONFLICT (ticket_type)
                DO UPDATE SET value = ticket_sequences.value + 1
                RETURNING value
                ",
            )
            .bind(ticket_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

            u64::try_from(value)
                .map_err(|_| RepositoryError::Database(format!("sequence underflow: {value}")))
        })
    }

    fn insert_if_absent<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = ticket
                .payload
                .to_value()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            // The insert is attributed to the submitter; the ticket id
            // doubles as the correlation handle.
            let ctx = AuditContext::new(
                ticket.submitter_id.to_string(),
                ticket.ticket_id.to_string(),
            );
            let mut scope = AuditedTransaction::begin(&self.pool, Some(ctx))
                .await
                .map_err(audit_err)?;

            let inserted = sqlx::query(
                r"
                INSERT INTO tickets
                    (id, ticket_id, ticket_type, submitter_id, submitter_email,
                     payload, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(ticket.id)
            .bind(ticket.ticket_id.as_str())
            .bind(ticket.ticket_type().as_str())
            .bind(ticket.submitter_id)
            .bind(&ticket.submitter_email)
            .bind(payload)
            .bind(ticket.status.as_str())
            .bind(ticket.created_at)
            .execute(scope.conn())
            .await;

            if let Err(e) = inserted {
                // The uniqueness constraint on ticket_id is the idempotency
                // check: a violation means this delivery is a duplicate.
                if e.as_database_error()
                    .is_some_and(|db| db.is_unique_violation())
                {
                    tracing::debug!(
                        ticket_id = %ticket.ticket_id,
                        "Duplicate delivery detected, nothing inserted"
                    );
                    return Ok(InsertOutcome::Duplicate);
                }
                return Err(db_err(e));
            }

            let new_values = Self::snapshot(&mut scope, &ticket.ticket_id, false)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Database("inserted row vanished within transaction".to_string())
                })?;

            scope
                .record(
                    "tickets",
                    &ticket.id.to_string(),
                    AuditAction::Insert,
                    None,
                    Some(&new_values),
                )
                .await
                .map_err(audit_err)?;

            scope.commit().await.map_err(audit_err)?;
            Ok(InsertOutcome::Inserted)
        })
    }

    fn get<'a>(
        &'a self,
        ticket_id: &'a TicketId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Ticket>, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = $1"
            ))
            .bind(ticket_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            row.as_ref().map(row_to_ticket).transpose()
        })
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

            let mut scope = AuditedTransaction::begin(&self.pool, ctx)
                .await
                .map_err(audit_err)?;

            // Lock the row so concurrent reviews serialize on it.
            let Some(old_values) = Self::snapshot(&mut scope, ticket_id, true).await? else {
                return Err(RepositoryError::NotFound(ticket_id.clone()));
            };

            let current = old_values
                .get("status")
                .and_then(serde_json::Value::as_str)
                .and_then(TicketStatus::parse)
                .ok_or_else(|| {
                    RepositoryError::Serialization("ticket row missing status".to_string())
                })?;
            if !current.can_transition_to(review.status) {
                return Err(RepositoryError::TerminalStatus {
                    ticket_id: ticket_id.clone(),
                    status: current,
                });
            }

            let row = sqlx::query(&format!(
                "UPDATE tickets
                 SET status = $2, reviewed_at = NOW(), reviewed_by = $3, admin_notes = $4
                 WHERE ticket_id = $1
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(ticket_id.as_str())
            .bind(review.status.as_str())
            .bind(&review.reviewed_by)
            .bind(&review.admin_notes)
            .fetch_one(scope.conn())
            .await
            .map_err(db_err)?;
            let ticket = row_to_ticket(&row)?;

            let new_values = Self::snapshot(&mut scope, ticket_id, false)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Database("updated row vanished within transaction".to_string())
                })?;

            scope
                .record(
                    "tickets",
                    &ticket.id.to_string(),
                    AuditAction::Update,
                    Some(&old_values),
                    Some(&new_values),
                )
                .await
                .map_err(audit_err)?;

            scope.commit().await.map_err(audit_err)?;
            Ok(ticket)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn ticket_columns_list_has_no_duplicates() {
        let mut columns: Vec<&str> = TICKET_COLUMNS.split(',').map(str::trim).collect();
        let total = columns.len();
        columns.sort_unstable();
        columns.dedup();
        assert_eq!(columns.len(), total);
    }
}
