//! Entitlement gate - the authorization façade the API layer calls before a
//! protected operation
//!
//! The gate owns no state. It translates a requirement (feature flag or
//! quota headroom) into an allow/deny decision with a machine-readable
//! reason; the API layer turns a deny into its 403 body. Counts for quota
//! requirements come from a caller-supplied provider, never from the gate.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::catalog::{FeatureKey, QuotaKey};
use crate::error::EngineResult;
use crate::service::SubscriptionService;

/// Caller-supplied resource counter, invoked only for quota requirements
pub type CountProvider<'a> = Box<dyn FnOnce() -> BoxFuture<'a, EngineResult<u32>> + Send + 'a>;

/// What the protected operation needs
pub enum Requirement<'a> {
    /// The current plan must grant this feature flag
    Feature(FeatureKey),
    /// The current resource count must be under the plan's quota
    Quota {
        key: QuotaKey,
        current_count: CountProvider<'a>,
    },
}

impl<'a> Requirement<'a> {
    pub fn feature(key: FeatureKey) -> Self {
        Requirement::Feature(key)
    }

    pub fn quota<F, Fut>(key: QuotaKey, current_count: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = EngineResult<u32>> + Send + 'a,
    {
        Requirement::Quota {
            key,
            current_count: Box::new(move || Box::pin(current_count())),
        }
    }
}

/// Why a requirement was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    FeatureNotInPlan { feature: FeatureKey },
    QuotaExceeded { quota: QuotaKey },
}

impl DenyReason {
    /// Human-readable message for the API layer's error body
    pub fn message(&self) -> String {
        match self {
            DenyReason::FeatureNotInPlan { feature } => {
                format!("The {feature} feature is only available on PRO and PREMIUM plans")
            }
            DenyReason::QuotaExceeded { quota } => {
                format!("The {quota} limit of the current plan has been reached")
            }
        }
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "decision")]
pub enum Decision {
    Allow,
    #[serde(rename_all = "camelCase")]
    Deny {
        #[serde(flatten)]
        reason: DenyReason,
        upgrade_required: bool,
    },
}

impl Decision {
    fn deny(reason: DenyReason) -> Self {
        Decision::Deny {
            reason,
            upgrade_required: true,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Stateless translation layer in front of [`SubscriptionService`]
pub struct EntitlementGate {
    service: Arc<SubscriptionService>,
}

impl EntitlementGate {
    pub fn new(service: Arc<SubscriptionService>) -> Self {
        Self { service }
    }

    /// Check a requirement against the tenant's current entitlements
    ///
    /// Business denials come back as `Ok(Deny { .. })`; store and transient
    /// failures propagate as `Err` for the API layer to map to an opaque
    /// server error.
    pub async fn authorize(
        &self,
        tenant_id: &str,
        requirement: Requirement<'_>,
    ) -> EngineResult<Decision> {
        match requirement {
            Requirement::Feature(key) => {
                if self.service.has_access(tenant_id, key).await? {
                    Ok(Decision::Allow)
                } else {
                    tracing::debug!(tenant_id, feature = %key, "feature denied");
                    Ok(Decision::deny(DenyReason::FeatureNotInPlan { feature: key }))
                }
            }
            Requirement::Quota { key, current_count } => {
                let count = current_count().await?;
                if self.service.check_quota(tenant_id, key, count).await? {
                    Ok(Decision::Allow)
                } else {
                    tracing::debug!(tenant_id, quota = %key, count, "quota denied");
                    Ok(Decision::deny(DenyReason::QuotaExceeded { quota: key }))
                }
            }
        }
    }
}
