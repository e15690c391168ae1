//! Subscription service - per-tenant plan state machine
//!
//! Reachable `(plan, status)` states: `(free, active)` [initial/terminal],
//! `(pro, active)` [trial or paid], `(premium, active)`, `(any, expired)`,
//! `(any, cancelled)`.
//!
//! # Mutation flow
//!
//! ```text
//! mutate(tenant_id)
//!     ├─ 1. Acquire per-tenant lock (no global lock)
//!     ├─ 2. get_or_create: lazy insert, then lazy expiry normalization
//!     ├─ 3. Check preconditions against the normalized record
//!     ├─ 4. Build SubscriptionChanges and write through the store
//!     ├─ 5. On write conflict, retry the read-modify-write cycle once
//!     └─ 6. Return the updated record
//! ```
//!
//! Expiry is purely reactive to reads; there is no background sweep and no
//! timer. The normalization write keeps the stale `end_date`, so repeated
//! reads of an expired record re-issue the same idempotent rewrite.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::catalog::{FeatureKey, PlanCatalog, PlanDefinition, PlanId, QuotaKey, TRIAL_PERIOD_DAYS};
use crate::error::{EngineError, EngineResult};
use crate::record::{SubscriptionChanges, SubscriptionRecord, SubscriptionStatus};
use crate::store::{StoreError, SubscriptionStore};

pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    /// Serializes read-modify-write sequences per tenant
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            store,
            catalog,
            tenant_locks: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    /// Fetch the tenant's record, creating the default free one on first
    /// access and normalizing a lapsed paid period before returning.
    pub async fn get_or_create(&self, tenant_id: &str) -> EngineResult<SubscriptionRecord> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        self.get_or_create_locked(tenant_id).await
    }

    /// Body of `get_or_create`; caller must hold the tenant lock
    async fn get_or_create_locked(&self, tenant_id: &str) -> EngineResult<SubscriptionRecord> {
        let record = match self.store.find(tenant_id).await? {
            Some(record) => record,
            None => {
                let fresh = SubscriptionRecord::free(tenant_id, Utc::now());
                match self.store.insert(fresh).await {
                    // A fresh free record has no end date and cannot be lapsed
                    Ok(record) => return Ok(record),
                    // Lost an insert race with another engine instance
                    Err(StoreError::AlreadyExists(_)) => self
                        .store
                        .find(tenant_id)
                        .await?
                        .ok_or_else(|| EngineError::TenantRecordNotFound(tenant_id.to_string()))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if !record.is_lapsed(Utc::now()) {
            return Ok(record);
        }

        // Lazy expiry: rewrite once and continue with the normalized record
        // in the same call. end_date and is_trial_used stay untouched.
        tracing::info!(
            tenant_id,
            plan = %record.plan,
            end_date = ?record.end_date,
            "subscription lapsed, reverting to free"
        );
        let changes = SubscriptionChanges::default()
            .plan(PlanId::Free)
            .status(SubscriptionStatus::Expired);
        Ok(self.write_with_retry(tenant_id, changes).await?)
    }

    /// One-time trial: seven days of Pro without payment
    pub async fn activate_trial(&self, tenant_id: &str) -> EngineResult<SubscriptionRecord> {
        let record = self
            .mutate(tenant_id, |current, now| {
                if current.is_trial_used {
                    return Err(EngineError::TrialAlreadyUsed);
                }
                Ok(SubscriptionChanges::default()
                    .plan(PlanId::Pro)
                    .status(SubscriptionStatus::Active)
                    .start_date(now)
                    .end_date(Some(now + Duration::days(TRIAL_PERIOD_DAYS)))
                    .trial_used())
            })
            .await?;

        tracing::info!(tenant_id, end_date = ?record.end_date, "trial activated");
        Ok(record)
    }

    /// Paid upgrade or renewal
    ///
    /// Non-additive: any remaining time on a prior period is discarded, and
    /// `last_payment_id` is overwritten on every call. A renewal of an
    /// already-active plan simply resets the period.
    pub async fn upgrade_plan(
        &self,
        tenant_id: &str,
        plan: PlanId,
        payment_ref: &str,
    ) -> EngineResult<SubscriptionRecord> {
        if plan == PlanId::Free {
            return Err(EngineError::UnknownPlan(plan.to_string()));
        }
        let duration_days = i64::from(self.catalog.lookup(plan).duration_days);

        let record = self
            .mutate(tenant_id, |_current, now| {
                Ok(SubscriptionChanges::default()
                    .plan(plan)
                    .status(SubscriptionStatus::Active)
                    .start_date(now)
                    .end_date(Some(now + Duration::days(duration_days)))
                    .payment(payment_ref, now))
            })
            .await?;

        tracing::info!(
            tenant_id,
            plan = %plan,
            payment_ref,
            end_date = ?record.end_date,
            "plan upgraded"
        );
        Ok(record)
    }

    /// Immediate downgrade to free; trial flag and payment history survive
    pub async fn cancel(&self, tenant_id: &str) -> EngineResult<SubscriptionRecord> {
        let record = self
            .mutate(tenant_id, |_current, now| {
                Ok(SubscriptionChanges::default()
                    .plan(PlanId::Free)
                    .status(SubscriptionStatus::Cancelled)
                    .end_date(Some(now)))
            })
            .await?;

        tracing::info!(tenant_id, "subscription cancelled");
        Ok(record)
    }

    /// Whether the tenant's current (post-normalization) plan grants a feature
    pub async fn has_access(&self, tenant_id: &str, feature: FeatureKey) -> EngineResult<bool> {
        let record = self.get_or_create(tenant_id).await?;
        Ok(self.catalog.lookup(record.plan).features.get(feature))
    }

    /// Whether `current_count` is still under the current plan's quota
    ///
    /// An absent limit means unlimited; otherwise the check is strict
    /// (`current_count < limit`).
    pub async fn check_quota(
        &self,
        tenant_id: &str,
        quota: QuotaKey,
        current_count: u32,
    ) -> EngineResult<bool> {
        let record = self.get_or_create(tenant_id).await?;
        Ok(match self.catalog.lookup(record.plan).quotas.get(quota) {
            None => true,
            Some(limit) => current_count < limit,
        })
    }

    /// Current record together with its plan definition (what the
    /// subscription overview endpoint returns to the frontend)
    pub async fn overview(
        &self,
        tenant_id: &str,
    ) -> EngineResult<(SubscriptionRecord, &PlanDefinition)> {
        let record = self.get_or_create(tenant_id).await?;
        let plan = self.catalog.lookup(record.plan);
        Ok((record, plan))
    }

    /// Shared mutation path: per-tenant lock, normalized read, precondition
    /// check, store write; the whole cycle retries once on a write conflict.
    async fn mutate<F>(&self, tenant_id: &str, build: F) -> EngineResult<SubscriptionRecord>
    where
        F: Fn(&SubscriptionRecord, DateTime<Utc>) -> EngineResult<SubscriptionChanges>,
    {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut retried = false;
        loop {
            let current = self.get_or_create_locked(tenant_id).await?;
            let changes = build(&current, Utc::now())?;
            match self.store.update(tenant_id, changes).await {
                Ok(record) => return Ok(record),
                Err(StoreError::Conflict(_)) if !retried => {
                    tracing::debug!(tenant_id, "write conflict, retrying mutation");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Plain write with a single conflict retry (no precondition re-check)
    async fn write_with_retry(
        &self,
        tenant_id: &str,
        changes: SubscriptionChanges,
    ) -> Result<SubscriptionRecord, StoreError> {
        match self.store.update(tenant_id, changes.clone()).await {
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(tenant_id, "write conflict, retrying normalization");
                self.store.update(tenant_id, changes).await
            }
            other => other,
        }
    }
}
