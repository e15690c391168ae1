//! Payment channel integration
//!
//! The payment channel (a Telegram-Stars-style provider) identifies a
//! purchase by an opaque invoice payload of the form
//! `subscription_{tenant_id}_{plan}`. This module owns the payload codec and
//! the handler that applies completed payments as plan upgrades.
//!
//! The handler fails closed: a malformed payload is logged and dropped, and
//! never panics or errors back into the channel. Deliveries are not
//! deduplicated by payment reference; a duplicate delivery re-applies a full
//! new period (most-recent-wins).

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::catalog::PlanId;
use crate::service::SubscriptionService;

/// Prefix shared by all subscription invoice payloads
pub const PAYLOAD_PREFIX: &str = "subscription_";

/// Why a payload failed strict parsing
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("missing `{PAYLOAD_PREFIX}` prefix")]
    BadPrefix,

    #[error("malformed payload: {0:?}")]
    Malformed(String),

    #[error("invalid tenant id: {0:?}")]
    BadTenant(String),

    #[error("plan is not purchasable: {0:?}")]
    BadPlan(String),
}

/// Decoded invoice payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPayload {
    pub tenant_id: String,
    pub plan: PlanId,
}

impl PaymentPayload {
    /// Build the payload embedded in an outgoing invoice
    pub fn encode(tenant_id: &str, plan: PlanId) -> String {
        format!("{PAYLOAD_PREFIX}{tenant_id}_{plan}")
    }

    /// Strict parse of an incoming payload
    ///
    /// The tenant segment must be a non-empty numeric identifier (Telegram
    /// merchant ids) and the plan must be a purchasable tier.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let rest = raw
            .strip_prefix(PAYLOAD_PREFIX)
            .ok_or(PayloadError::BadPrefix)?;
        let (tenant_id, plan) = rest
            .rsplit_once('_')
            .ok_or_else(|| PayloadError::Malformed(raw.to_string()))?;

        if tenant_id.is_empty() || !tenant_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PayloadError::BadTenant(tenant_id.to_string()));
        }

        let plan_id =
            PlanId::from_str(plan).map_err(|_| PayloadError::BadPlan(plan.to_string()))?;
        if plan_id == PlanId::Free {
            return Err(PayloadError::BadPlan(plan.to_string()));
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            plan: plan_id,
        })
    }
}

/// Abstract capability the payment channel adapter calls on completed
/// payments
#[async_trait]
pub trait PaymentDelivery: Send + Sync {
    /// Deliver one payment-completed event
    ///
    /// `payload` is the opaque invoice payload, `payment_ref` the
    /// provider-assigned charge id. Must not fail into the channel.
    async fn deliver(&self, payload: &str, payment_ref: &str);
}

/// Applies completed payments as plan upgrades
pub struct PaymentEventHandler {
    service: Arc<SubscriptionService>,
}

impl PaymentEventHandler {
    pub fn new(service: Arc<SubscriptionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PaymentDelivery for PaymentEventHandler {
    async fn deliver(&self, payload: &str, payment_ref: &str) {
        let parsed = match PaymentPayload::parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(payload, payment_ref, error = %e, "dropping malformed payment event");
                return;
            }
        };

        match self
            .service
            .upgrade_plan(&parsed.tenant_id, parsed.plan, payment_ref)
            .await
        {
            Ok(record) => {
                tracing::info!(
                    tenant_id = %parsed.tenant_id,
                    plan = %parsed.plan,
                    payment_ref,
                    end_date = ?record.end_date,
                    "payment applied"
                );
            }
            Err(e) => {
                // Other tenants' events must keep flowing
                tracing::error!(
                    tenant_id = %parsed.tenant_id,
                    payment_ref,
                    error = %e,
                    "failed to apply payment"
                );
            }
        }
    }
}
