//! PostgreSQL-backed subscription store
//!
//! Schema (managed by the deployment's migration step):
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS subscriptions (
//!     tenant_id         TEXT PRIMARY KEY,
//!     plan              TEXT NOT NULL DEFAULT 'free',
//!     status            TEXT NOT NULL DEFAULT 'active',
//!     start_date        TIMESTAMPTZ NOT NULL,
//!     end_date          TIMESTAMPTZ,
//!     is_trial_used     BOOLEAN NOT NULL DEFAULT FALSE,
//!     last_payment_id   TEXT,
//!     last_payment_date TIMESTAMPTZ,
//!     created_at        TIMESTAMPTZ NOT NULL,
//!     updated_at        TIMESTAMPTZ NOT NULL
//! )
//! ```
//!
//! `update` runs SELECT ... FOR UPDATE inside a transaction, so concurrent
//! mutations of the same tenant from other engine instances serialize at the
//! row. Serialization failures surface as [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{StoreError, SubscriptionStore};
use crate::catalog::PlanId;
use crate::record::{SubscriptionChanges, SubscriptionRecord, SubscriptionStatus};

const SELECT_COLUMNS: &str = "tenant_id, plan, status, start_date, end_date, is_trial_used, \
     last_payment_id, last_payment_date, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the subscriptions table if it does not exist yet
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                tenant_id         TEXT PRIMARY KEY,
                plan              TEXT NOT NULL DEFAULT 'free',
                status            TEXT NOT NULL DEFAULT 'active',
                start_date        TIMESTAMPTZ NOT NULL,
                end_date          TIMESTAMPTZ,
                is_trial_used     BOOLEAN NOT NULL DEFAULT FALSE,
                last_payment_id   TEXT,
                last_payment_date TIMESTAMPTZ,
                created_at        TIMESTAMPTZ NOT NULL,
                updated_at        TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("", e))?;
        Ok(())
    }
}

/// Raw row; plan/status are stored as their wire names
#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: String,
    plan: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    is_trial_used: bool,
    last_payment_id: Option<String>,
    last_payment_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, StoreError> {
        let plan: PlanId = row
            .plan
            .parse()
            .map_err(|_| corrupt_row(&row.tenant_id, "plan", &row.plan))?;
        let status = SubscriptionStatus::parse_str(&row.status)
            .ok_or_else(|| corrupt_row(&row.tenant_id, "status", &row.status))?;
        Ok(SubscriptionRecord {
            tenant_id: row.tenant_id,
            plan,
            status,
            start_date: row.start_date,
            end_date: row.end_date,
            is_trial_used: row.is_trial_used,
            last_payment_id: row.last_payment_id,
            last_payment_date: row.last_payment_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt_row(tenant_id: &str, column: &str, value: &str) -> StoreError {
    StoreError::Io(
        format!("corrupt subscriptions row for tenant {tenant_id}: {column} = {value:?}").into(),
    )
}

fn map_sqlx_error(tenant_id: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return StoreError::AlreadyExists(tenant_id.to_string());
        }
        // 40001 = serialization_failure
        if db.code().as_deref() == Some("40001") {
            return StoreError::Conflict(tenant_id.to_string());
        }
    }
    StoreError::Io(e.into())
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn find(&self, tenant_id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(tenant_id, e))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn insert(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, StoreError> {
        sqlx::query(
            "INSERT INTO subscriptions (tenant_id, plan, status, start_date, end_date,
                is_trial_used, last_payment_id, last_payment_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&record.tenant_id)
        .bind(record.plan.as_str())
        .bind(record.status.as_str())
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.is_trial_used)
        .bind(&record.last_payment_id)
        .bind(record.last_payment_date)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(&record.tenant_id, e))?;

        Ok(record)
    }

    async fn update(
        &self,
        tenant_id: &str,
        changes: SubscriptionChanges,
    ) -> Result<SubscriptionRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(tenant_id, e))?;

        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM subscriptions WHERE tenant_id = $1 FOR UPDATE"
        ))
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(tenant_id, e))?;

        let mut record = row
            .ok_or_else(|| StoreError::NotFound(tenant_id.to_string()))
            .and_then(SubscriptionRecord::try_from)?;
        changes.apply(&mut record, Utc::now());

        sqlx::query(
            "UPDATE subscriptions SET plan = $2, status = $3, start_date = $4, end_date = $5,
                is_trial_used = $6, last_payment_id = $7, last_payment_date = $8, updated_at = $9
             WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .bind(record.plan.as_str())
        .bind(record.status.as_str())
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.is_trial_used)
        .bind(&record.last_payment_id)
        .bind(record.last_payment_date)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(tenant_id, e))?;

        tx.commit().await.map_err(|e| map_sqlx_error(tenant_id, e))?;
        Ok(record)
    }
}
