//! Audited organization repository.
//!
//! Organizations are what approved suggestions become, and the entity most
//! often touched by admins, so their mutations demonstrate the full capture
//! path: snapshot before, mutate, snapshot after, diff, record, one commit.

use crate::audit::AuditedTransaction;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use waypost_core::audit::{AuditAction, AuditContext, AuditError};

/// An organization row.
#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Latitude in degrees, if located.
    pub latitude: Option<f64>,
    /// Longitude in degrees, if located.
    pub longitude: Option<f64>,
    /// Street address.
    pub address: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

/// Fields an update may change. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct OrganizationUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New street address.
    pub address: Option<String>,
    /// New website URL.
    pub website: Option<String>,
    /// New description.
    pub description: Option<String>,
}

/// PostgreSQL organization repository with audited mutations.
#[derive(Clone)]
pub struct PostgresOrganizationRepository {
    pool: PgPool,
}

impl PostgresOrganizationRepository {
    /// Create a repository over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn snapshot(
        scope: &mut AuditedTransaction,
        id: Uuid,
        for_update: bool,
    ) -> Result<Option<serde_json::Value>, AuditError> {
        let sql = if for_update {
            "SELECT to_jsonb(organizations) FROM organizations WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT to_jsonb(organizations) FROM organizations WHERE id = $1"
        };
        sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(scope.conn())
            .await
            .map_err(|e| AuditError::Database(e.to_string()))
    }

    /// Insert an organization, capturing the INSERT audit record in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Database`] if the insert or the capture fails;
    /// in either case nothing is committed.
    pub async fn create(
        &self,
        organization: &Organization,
        ctx: Option<AuditContext>,
    ) -> Result<(), AuditError> {
        let mut scope = AuditedTransaction::begin(&self.pool, ctx).await?;

        sqlx::query(
            r"
            INSERT INTO organizations
                (id, name, latitude, longitude, address, website, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(organization.id)
        .bind(&organization.name)
        .bind(organization.latitude)
        .bind(organization.longitude)
        .bind(&organization.address)
        .bind(&organization.website)
        .bind(&organization.description)
        .bind(organization.created_at)
        .execute(scope.conn())
        .await
        .map_err(|e| AuditError::Database(e.to_string()))?;

        let new_values = Self::snapshot(&mut scope, organization.id, false)
            .await?
            .ok_or_else(|| {
                AuditError::Database("inserted row vanished within transaction".to_string())
            })?;

        scope
            .record(
                "organizations",
                &organization.id.to_string(),
                AuditAction::Insert,
                None,
                Some(&new_values),
            )
            .await?;

        scope.commit().await
    }

    /// Apply an update, capturing before/after snapshots and the computed
    /// field diff in the same transaction.
    ///
    /// Returns the post-update snapshot. Returns `Ok(None)` when no row has
    /// the given id.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Database`] if the update or the capture fails;
    /// the transaction aborts as a whole.
    pub async fn update(
        &self,
        id: Uuid,
        update: OrganizationUpdate,
        ctx: Option<AuditContext>,
    ) -> Result<Option<serde_json::Value>, AuditError> {
        let mut scope = AuditedTransaction::begin(&self.pool, ctx).await?;

        let Some(old_values) = Self::snapshot(&mut scope, id, true).await? else {
            return Ok(None);
        };

        sqlx::query(
            r"
            UPDATE organizations
            SET name = COALESCE($2, name),
                address = COALESCE($3, address),
                website = COALESCE($4, website),
                description = COALESCE($5, description)
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.address)
        .bind(&update.website)
        .bind(&update.description)
        .execute(scope.conn())
        .await
        .map_err(|e| AuditError::Database(e.to_string()))?;

        let new_values = Self::snapshot(&mut scope, id, false).await?.ok_or_else(|| {
            AuditError::Database("updated row vanished within transaction".to_string())
        })?;

        scope
            .record(
                "organizations",
                &id.to_string(),
                AuditAction::Update,
                Some(&old_values),
                Some(&new_values),
            )
            .await?;

        scope.commit().await?;
        Ok(Some(new_values))
    }
}
