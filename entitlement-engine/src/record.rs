//! Subscription record: one row per tenant, owned by the service layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::PlanId;

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "expired" => Some(SubscriptionStatus::Expired),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Per-tenant subscription state
///
/// Created lazily on first access, mutated by trial activation, upgrades,
/// cancellation and expiry normalization. Never deleted; cancellation is a
/// state, not removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub tenant_id: String,
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    /// `None` = non-expiring (free tier only)
    pub end_date: Option<DateTime<Utc>>,
    /// Monotonic: transitions false -> true exactly once
    pub is_trial_used: bool,
    pub last_payment_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Default record inserted on a tenant's first access
    pub fn free(tenant_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            plan: PlanId::Free,
            status: SubscriptionStatus::Active,
            start_date: now,
            end_date: None,
            is_trial_used: false,
            last_payment_id: None,
            last_payment_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An active record whose paid period has strictly elapsed
    ///
    /// Comparison is strict: a record expiring exactly at `now` is still
    /// active for that instant.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && matches!(self.end_date, Some(end) if end < now)
    }
}

/// Partial update handed to the store; `None` = leave the field unchanged
///
/// The store applies these mechanically and does not interpret business
/// rules; every mutation path in the service builds one of these.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    pub plan: Option<PlanId>,
    pub status: Option<SubscriptionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub is_trial_used: Option<bool>,
    pub last_payment_id: Option<String>,
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl SubscriptionChanges {
    pub fn plan(mut self, plan: PlanId) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn status(mut self, status: SubscriptionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn end_date(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn trial_used(mut self) -> Self {
        self.is_trial_used = Some(true);
        self
    }

    pub fn payment(mut self, payment_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.last_payment_id = Some(payment_id.into());
        self.last_payment_date = Some(at);
        self
    }

    /// Apply this change set to a record, stamping `updated_at`
    pub fn apply(&self, record: &mut SubscriptionRecord, now: DateTime<Utc>) {
        if let Some(plan) = self.plan {
            record.plan = plan;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(start) = self.start_date {
            record.start_date = start;
        }
        if let Some(end) = self.end_date {
            record.end_date = end;
        }
        if let Some(trial) = self.is_trial_used {
            record.is_trial_used = trial;
        }
        if let Some(ref payment_id) = self.last_payment_id {
            record.last_payment_id = Some(payment_id.clone());
        }
        if let Some(paid_at) = self.last_payment_date {
            record.last_payment_date = Some(paid_at);
        }
        record.updated_at = now;
    }
}
