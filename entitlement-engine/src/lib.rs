//! Subscription & entitlement engine
//!
//! Gates tenant (merchant) access to product features based on a time-bound
//! subscription plan. The engine owns a tenant's current plan, decides when
//! that plan has lapsed, and answers "is feature X allowed / is quota Y
//! exceeded" for the rest of the system.
//!
//! Components:
//! - [`catalog::PlanCatalog`]: immutable registry of the free/pro/premium
//!   tiers and their grants
//! - [`store::SubscriptionStore`]: keyed record store contract
//!   ([`store::MemoryStore`] for tests, [`store::PgStore`] for production)
//! - [`service::SubscriptionService`]: the per-tenant state machine (lazy
//!   creation, trial, upgrade, cancellation, lazy expiry)
//! - [`gate::EntitlementGate`]: allow/deny façade for the API layer
//! - [`payment::PaymentEventHandler`]: applies payment-completed events from
//!   the payment channel as upgrades
//!
//! The engine is a library-level service consumed in-process; it owns no
//! wire protocol and assumes callers hand it an already-authenticated
//! tenant id.

pub mod catalog;
pub mod error;
pub mod gate;
pub mod payment;
pub mod record;
pub mod service;
pub mod store;

pub use catalog::{
    FeatureKey, FeatureSet, PlanCatalog, PlanDefinition, PlanId, QuotaKey, QuotaSet, SupportTier,
    TRIAL_PERIOD_DAYS,
};
pub use error::{EngineError, EngineResult};
pub use gate::{CountProvider, Decision, DenyReason, EntitlementGate, Requirement};
pub use payment::{PaymentDelivery, PaymentEventHandler, PaymentPayload, PayloadError};
pub use record::{SubscriptionChanges, SubscriptionRecord, SubscriptionStatus};
pub use service::SubscriptionService;
pub use store::{MemoryStore, PgStore, StoreError, SubscriptionStore};
