//! PostgreSQL dead-letter store.
//!
//! Persistent storage for envelopes that failed processing after exhausting
//! retries, plus the management operations an operator needs: inspection,
//! status updates, resolution, and retention-driven purging.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use waypost_core::dead_letter::{DeadLetter, DeadLetterStatus, DeadLetterStore};
use waypost_core::envelope::Envelope;
use waypost_core::repository::RepositoryError;

/// How long resolved and discarded entries are retained before
/// [`PostgresDeadLetters::purge_resolved_before`] removes them, by default.
/// Pending entries are never purged; they are the alert condition.
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

fn db_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn row_to_dead_letter(row: &PgRow) -> Result<DeadLetter, RepositoryError> {
    let envelope: serde_json::Value = row.try_get("envelope").map_err(db_err)?;
    let envelope: Envelope = serde_json::from_value(envelope)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let status: String = row.try_get("status").map_err(db_err)?;
    let status = DeadLetterStatus::parse(&status)?;

    Ok(DeadLetter {
        id: row.try_get("id").map_err(db_err)?,
        envelope,
        error_message: row.try_get("error_message").map_err(db_err)?,
        error_details: row.try_get("error_details").map_err(db_err)?,
        attempts: row.try_get("attempts").map_err(db_err)?,
        first_failed_at: row.try_get("first_failed_at").map_err(db_err)?,
        last_failed_at: row.try_get("last_failed_at").map_err(db_err)?,
        status,
        resolved_at: row.try_get("resolved_at").map_err(db_err)?,
        resolved_by: row.try_get("resolved_by").map_err(db_err)?,
        resolution_notes: row.try_get("resolution_notes").map_err(db_err)?,
    })
}

const DEAD_LETTER_COLUMNS: &str = "id, envelope, error_message, error_details, attempts, \
     first_failed_at, last_failed_at, status, resolved_at, resolved_by, resolution_notes";

/// PostgreSQL-backed [`DeadLetterStore`] with management operations.
#[derive(Clone)]
pub struct PostgresDeadLetters {
    pool: PgPool,
}

impl PostgresDeadLetters {
    /// Create a store over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<DeadLetter>, RepositoryError> {
        self.list_by_status(DeadLetterStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters
             WHERE status = $1 ORDER BY first_failed_at ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_dead_letter).collect()
    }

    /// Fetch one entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails or the
    /// entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<DeadLetter, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_dead_letter(&row)
    }

    /// Update an entry's status.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE dead_letters SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        tracing::info!(dead_letter_id = id, status = status.as_str(), "Dead letter status updated");
        Ok(())
    }

    /// Mark an entry resolved after successful reprocessing.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'resolved', resolved_at = NOW(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::info!(dead_letter_id = id, resolved_by = resolved_by, "Dead letter resolved");
        metrics::counter!("pipeline.dead_letters.resolved").increment(1);
        Ok(())
    }

    /// Mark an entry permanently discarded (cannot be fixed).
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'discarded', resolved_at = NOW(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::warn!(dead_letter_id = id, reason = reason, "Dead letter discarded");
        metrics::counter!("pipeline.dead_letters.discarded").increment(1);
        Ok(())
    }

    /// Delete resolved and discarded entries older than the cutoff.
    ///
    /// Pending and processing entries are never purged. Returns how many
    /// rows were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the delete fails.
    pub async fn purge_resolved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM dead_letters
            WHERE status IN ('resolved', 'discarded') AND resolved_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    /// The default retention cutoff relative to `now`.
    #[must_use]
    pub fn default_retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(DEFAULT_RETENTION_DAYS)
    }
}

impl DeadLetterStore for PostgresDeadLetters {
    fn add_entry<'a>(
        &'a self,
        envelope: &'a Envelope,
        error_message: &'a str,
        error_details: Option<&'a str>,
        attempts: i32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + 'a>> {
        Box::pin(async move {
            let envelope_json = serde_json::to_value(envelope)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

            let id: (i64,) = sqlx::query_as(
                r"
                INSERT INTO dead_letters
                    (event_type, ticket_id, envelope, error_message, error_details, attempts)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                ",
            )
            .bind(&envelope.event_type)
            .bind(envelope.ticket_id.as_str())
            .bind(envelope_json)
            .bind(error_message)
            .bind(error_details)
            .bind(attempts)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

            tracing::warn!(
                dead_letter_id = id.0,
                ticket_id = %envelope.ticket_id,
                event_type = %envelope.event_type,
                error = error_message,
                attempts = attempts,
                "Envelope added to dead letter store"
            );

            metrics::counter!("pipeline.dead_letters.added", "event_type" => envelope.event_type.clone())
                .increment(1);

            Ok(id.0)
        })
    }

    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<i64, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = 'pending'")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_err)?;
            Ok(count)
        })
    }
}
