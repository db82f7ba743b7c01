//! Read-only, paginated audit history queries with redaction.
//!
//! Three lookup shapes, all served by one filtered query:
//!
//! - `(table, record_id)`: the full history of one entity
//! - `user_id`: one actor's activity
//! - `(table, action, since)`: operational review
//!
//! Results page newest-first through an opaque keyset cursor. Snapshot
//! values are redacted on the way out; the stored rows stay raw for
//! internal compliance use.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use waypost_core::audit::redaction::RedactionPolicy;
use waypost_core::audit::{AuditAction, AuditError, AuditRecord, AuditSource};

/// Maximum page size; requests above it are clamped.
pub const MAX_PAGE_SIZE: usize = 200;

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Parameters for an audit history lookup.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Restrict to one audited table.
    pub table: Option<String>,
    /// Restrict to one row's history. Requires `table`.
    pub record_id: Option<String>,
    /// Restrict to one actor's activity.
    pub user_id: Option<String>,
    /// Restrict to one mutation kind.
    pub action: Option<AuditAction>,
    /// Only records captured at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Page size, clamped to `1..=200`. Default 50.
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page's `next_cursor`.
    pub cursor: Option<String>,
}

/// One page of audit history.
#[derive(Debug, Clone)]
pub struct AuditPage {
    /// Records, newest first, redacted per the service policy.
    pub records: Vec<AuditRecord>,
    /// Cursor for the next page; `None` when this page is the last.
    pub next_cursor: Option<String>,
}

fn encode_cursor(id: i64) -> String {
    BASE64.encode(format!("id:{id}"))
}

fn decode_cursor(cursor: &str) -> Result<i64, AuditError> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|e| AuditError::InvalidCursor(e.to_string()))?;
    let text =
        String::from_utf8(bytes).map_err(|e| AuditError::InvalidCursor(e.to_string()))?;
    text.strip_prefix("id:")
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| AuditError::InvalidCursor(format!("unrecognized cursor: {text}")))
}

fn row_to_record(row: &PgRow) -> Result<AuditRecord, AuditError> {
    let map_err = |e: sqlx::Error| AuditError::Database(e.to_string());

    let action: String = row.try_get("action").map_err(map_err)?;
    let action = AuditAction::parse(&action)
        .ok_or_else(|| AuditError::Serialization(format!("bad action: {action}")))?;

    let source: String = row.try_get("source").map_err(map_err)?;
    let source = AuditSource::parse(&source)
        .ok_or_else(|| AuditError::Serialization(format!("bad source: {source}")))?;

    Ok(AuditRecord {
        id: row.try_get("id").map_err(map_err)?,
        timestamp: row.try_get("timestamp").map_err(map_err)?,
        table_name: row.try_get("table_name").map_err(map_err)?,
        record_id: row.try_get("record_id").map_err(map_err)?,
        action,
        user_id: row.try_get("user_id").map_err(map_err)?,
        request_id: row.try_get("request_id").map_err(map_err)?,
        old_values: row.try_get("old_values").map_err(map_err)?,
        new_values: row.try_get("new_values").map_err(map_err)?,
        changed_fields: row.try_get("changed_fields").map_err(map_err)?,
        source,
    })
}

/// Read-only audit history service.
pub struct AuditQueryService {
    pool: PgPool,
    policy: RedactionPolicy,
}

impl AuditQueryService {
    /// Create a service with the given redaction policy.
    #[must_use]
    pub const fn new(pool: PgPool, policy: RedactionPolicy) -> Self {
        Self { pool, policy }
    }

    /// Run a history lookup.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidQuery`] when `record_id` is given without
    ///   `table`.
    /// - [`AuditError::InvalidCursor`] when the cursor does not decode.
    /// - [`AuditError::Database`] on query failure.
    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        if query.record_id.is_some() && query.table.is_none() {
            return Err(AuditError::InvalidQuery(
                "record_id requires table".to_string(),
            ));
        }

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let cursor_id = query.cursor.as_deref().map(decode_cursor).transpose()?;

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, timestamp, table_name, record_id, action, user_id, request_id, \
             old_values, new_values, changed_fields, source FROM audit_log WHERE TRUE",
        );
        if let Some(table) = &query.table {
            builder.push(" AND table_name = ").push_bind(table.as_str());
        }
        if let Some(record_id) = &query.record_id {
            builder.push(" AND record_id = ").push_bind(record_id.as_str());
        }
        if let Some(user_id) = &query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_str());
        }
        if let Some(action) = query.action {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(since) = query.since {
            builder.push(" AND timestamp >= ").push_bind(since);
        }
        if let Some(cursor_id) = cursor_id {
            builder.push(" AND id < ").push_bind(cursor_id);
        }
        // Fetch one extra row to learn whether another page exists.
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(limit as i64 + 1);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuditError::Database(e.to_string()))?;

        let mut records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if records.len() > limit {
            records.truncate(limit);
            records.last().map(|r| encode_cursor(r.id))
        } else {
            None
        };

        // Redaction happens here, at read time. Storage keeps the raw rows.
        for record in &mut records {
            self.policy.redact_opt(&mut record.old_values);
            self.policy.redact_opt(&mut record.new_values);
        }

        Ok(AuditPage {
            records,
            next_cursor,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        for id in [1_i64, 42, i64::MAX] {
            assert_eq!(decode_cursor(&encode_cursor(id)).unwrap(), id);
        }
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!(matches!(
            decode_cursor("not-base64!"),
            Err(AuditError::InvalidCursor(_))
        ));
        let wrong_shape = BASE64.encode("offset:12");
        assert!(matches!(
            decode_cursor(&wrong_shape),
            Err(AuditError::InvalidCursor(_))
        ));
    }

    #[test]
    fn cursor_is_opaque() {
        // Nothing in the token leaks the raw id.
        assert!(!encode_cursor(123_456).contains("123456"));
    }
}
