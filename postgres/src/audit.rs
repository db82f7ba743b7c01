//! Transactional audit capture.
//!
//! [`AuditedTransaction`] is the scoped-acquisition block the audit context
//! propagator describes: it owns the database transaction *and* the caller
//! identity for one unit of work. Repositories run their mutations through
//! it and call [`AuditedTransaction::record`] with before/after snapshots;
//! the audit row is inserted on the same transaction, so a committed
//! mutation always has its record and a rolled-back mutation never does.
//!
//! Identity is never attached to the connection as ambient state. It lives
//! in this value, is readable while the scope is open, and is gone when the
//! scope ends (commit or drop), so pooled connections cannot carry one
//! caller's identity into another caller's work.
//!
//! The only connection-local state the scope sets is a `SET LOCAL` flag
//! telling the safety-net trigger that application capture is active for
//! this transaction; it expires with the transaction either way.

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Transaction};
use waypost_core::audit::diff::changed_fields;
use waypost_core::audit::{AuditAction, AuditContext, AuditError};

/// Tables the capture engine records mutations for.
///
/// Mutating any other table through an [`AuditedTransaction::record`] call
/// is a programming error and is rejected.
pub const AUDITED_TABLES: [&str; 2] = ["tickets", "organizations"];

/// Filter a snapshot down to the given keys.
fn project(snapshot: &serde_json::Value, keys: &[String]) -> serde_json::Value {
    let serde_json::Value::Object(map) = snapshot else {
        return snapshot.clone();
    };
    serde_json::Value::Object(
        map.iter()
            .filter(|(key, _)| keys.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// A unit of work with caller identity and transactional audit capture.
pub struct AuditedTransaction {
    tx: Transaction<'static, Postgres>,
    ctx: Option<AuditContext>,
}

impl AuditedTransaction {
    /// Open a transaction, attaching the caller's identity to the scope.
    ///
    /// `ctx: None` is the expected state for maintenance work that is not
    /// performed on behalf of any caller; audit records written in such a
    /// scope carry null identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Database`] if the transaction cannot be
    /// started.
    pub async fn begin(
        pool: &PgPool,
        ctx: Option<AuditContext>,
    ) -> Result<Self, AuditError> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| AuditError::Database(e.to_string()))?;

        // SET LOCAL: scoped to this transaction, gone at commit or rollback.
        sqlx::query("SELECT set_config('waypost.audit_source', 'application', true)")
            .execute(&mut *tx)
            .await
            .map_err(|e| AuditError::Database(e.to_string()))?;

        Ok(Self { tx, ctx })
    }

    /// The identity attached to this unit of work, if any.
    #[must_use]
    pub fn context(&self) -> Option<&AuditContext> {
        self.ctx.as_ref()
    }

    /// The underlying connection, for running the mutation itself.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Record one mutation to an audited table.
    ///
    /// For UPDATEs, `changed_fields` is computed from the snapshots and the
    /// stored `old_values`/`new_values` are projected down to the fields
    /// that actually changed. INSERTs store the full new snapshot, DELETEs
    /// the full old one.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidQuery`] if `table` is not on the audited list.
    /// - [`AuditError::Database`] if the insert fails. The caller must let
    ///   this propagate: the enclosing transaction aborts rather than
    ///   committing a mutation without its record.
    pub async fn record(
        &mut self,
        table: &str,
        record_id: &str,
        action: AuditAction,
        old: Option<&serde_json::Value>,
        new: Option<&serde_json::Value>,
    ) -> Result<(), AuditError> {
        if !AUDITED_TABLES.contains(&table) {
            return Err(AuditError::InvalidQuery(format!(
                "table '{table}' is not audited"
            )));
        }

        let (old_values, new_values, fields) = match (action, old, new) {
            (AuditAction::Update, Some(old), Some(new)) => {
                let fields = changed_fields(old, new);
                (
                    Some(project(old, &fields)),
                    Some(project(new, &fields)),
                    Some(fields),
                )
            }
            _ => (old.cloned(), new.cloned(), None),
        };

        sqlx::query(
            r"
            INSERT INTO audit_log
                (table_name, record_id, action, user_id, request_id,
                 old_values, new_values, changed_fields, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'application')
            ",
        )
        .bind(table)
        .bind(record_id)
        .bind(action.as_str())
        .bind(self.ctx.as_ref().map(|c| c.user_id.as_str()))
        .bind(self.ctx.as_ref().map(|c| c.request_id.as_str()))
        .bind(old_values)
        .bind(new_values)
        .bind(fields)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AuditError::Database(e.to_string()))?;

        Ok(())
    }

    /// Commit the unit of work: the mutation and its audit records land
    /// together. Dropping the scope without committing rolls both back.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Database`] if the commit fails.
    pub async fn commit(self) -> Result<(), AuditError> {
        self.tx
            .commit()
            .await
            .map_err(|e| AuditError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_keeps_only_requested_keys() {
        let snapshot = json!({"name": "A", "address": "1 Main St", "website": null});
        let projected = project(&snapshot, &["name".to_string()]);
        assert_eq!(projected, json!({"name": "A"}));
    }

    #[test]
    fn audited_tables_cover_the_mutated_entities() {
        assert!(AUDITED_TABLES.contains(&"tickets"));
        assert!(AUDITED_TABLES.contains(&"organizations"));
    }
}
