//! End-to-end tests of the subscription state machine, gate and payment
//! handler over the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use entitlement_engine::{
    Decision, DenyReason, EngineError, EntitlementGate, FeatureKey, MemoryStore, PaymentDelivery,
    PaymentEventHandler, PlanCatalog, PlanId, QuotaKey, Requirement, StoreError,
    SubscriptionChanges, SubscriptionRecord, SubscriptionService, SubscriptionStatus,
    SubscriptionStore, TRIAL_PERIOD_DAYS,
};

fn create_engine() -> (Arc<SubscriptionService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(SubscriptionService::new(
        store.clone(),
        Arc::new(PlanCatalog::builtin()),
    ));
    (service, store)
}

/// Force a paid period into the past through the store handle, the way a
/// clock would move past it.
async fn force_lapsed(store: &MemoryStore, tenant_id: &str) {
    store
        .update(
            tenant_id,
            SubscriptionChanges::default().end_date(Some(Utc::now() - Duration::seconds(1))),
        )
        .await
        .unwrap();
}

// ========================================================================
// Lazy creation
// ========================================================================

#[tokio::test]
async fn first_access_creates_default_free_record() {
    let (service, store) = create_engine();

    let record = service.get_or_create("555").await.unwrap();
    assert_eq!(record.tenant_id, "555");
    assert_eq!(record.plan, PlanId::Free);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.end_date, None);
    assert!(!record.is_trial_used);

    // idempotent: a second call returns the same record, no extra row
    let again = service.get_or_create("555").await.unwrap();
    assert_eq!(again, record);
    assert_eq!(store.len(), 1);
}

// ========================================================================
// Trial
// ========================================================================

#[tokio::test]
async fn trial_grants_seven_days_of_pro_exactly_once() {
    let (service, _store) = create_engine();

    let before = Utc::now();
    let record = service.activate_trial("555").await.unwrap();
    let after = Utc::now();

    assert_eq!(record.plan, PlanId::Pro);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert!(record.is_trial_used);
    let end = record.end_date.unwrap();
    assert!(end >= before + Duration::days(TRIAL_PERIOD_DAYS));
    assert!(end <= after + Duration::days(TRIAL_PERIOD_DAYS));

    let err = service.activate_trial("555").await.unwrap_err();
    assert!(matches!(err, EngineError::TrialAlreadyUsed));
}

#[tokio::test]
async fn trial_stays_used_after_expiry_and_cancel() {
    let (service, store) = create_engine();

    service.activate_trial("555").await.unwrap();
    force_lapsed(&store, "555").await;

    let record = service.get_or_create("555").await.unwrap();
    assert_eq!(record.plan, PlanId::Free);
    assert_eq!(record.status, SubscriptionStatus::Expired);
    assert!(record.is_trial_used);
    assert!(matches!(
        service.activate_trial("555").await.unwrap_err(),
        EngineError::TrialAlreadyUsed
    ));

    service.cancel("555").await.unwrap();
    assert!(matches!(
        service.activate_trial("555").await.unwrap_err(),
        EngineError::TrialAlreadyUsed
    ));
}

#[tokio::test]
async fn concurrent_trial_activations_succeed_once() {
    let (service, _store) = create_engine();

    let (a, b) = tokio::join!(service.activate_trial("555"), service.activate_trial("555"));
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, EngineError::TrialAlreadyUsed));
}

// ========================================================================
// Expiry normalization
// ========================================================================

#[tokio::test]
async fn lapsed_paid_plan_is_normalized_on_read() {
    let (service, store) = create_engine();

    service.activate_trial("555").await.unwrap();
    force_lapsed(&store, "555").await;

    let record = service.get_or_create("555").await.unwrap();
    assert_eq!(record.plan, PlanId::Free);
    assert_eq!(record.status, SubscriptionStatus::Expired);
    // normalization keeps the stale end date untouched
    assert!(record.end_date.unwrap() < Utc::now());

    // re-reading re-detects the same stale end date, idempotently
    let again = service.get_or_create("555").await.unwrap();
    assert_eq!(again.plan, PlanId::Free);
    assert_eq!(again.status, SubscriptionStatus::Expired);
    assert_eq!(again.end_date, record.end_date);
}

#[tokio::test]
async fn expired_premium_loses_api_access_on_next_check() {
    let (service, store) = create_engine();

    service
        .upgrade_plan("777", PlanId::Premium, "pay_abc")
        .await
        .unwrap();
    assert!(service.has_access("777", FeatureKey::ApiAccess).await.unwrap());

    force_lapsed(&store, "777").await;
    assert!(!service.has_access("777", FeatureKey::ApiAccess).await.unwrap());
}

// ========================================================================
// Upgrade
// ========================================================================

#[tokio::test]
async fn upgrade_sets_period_and_payment_trail() {
    let (service, _store) = create_engine();

    let before = Utc::now();
    let record = service
        .upgrade_plan("777", PlanId::Premium, "pay_abc")
        .await
        .unwrap();
    let after = Utc::now();

    assert_eq!(record.plan, PlanId::Premium);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.last_payment_id.as_deref(), Some("pay_abc"));
    assert!(record.last_payment_date.is_some());
    let end = record.end_date.unwrap();
    assert!(end >= before + Duration::days(30));
    assert!(end <= after + Duration::days(30));
}

#[tokio::test]
async fn upgrade_resets_the_period_instead_of_extending_it() {
    let (service, store) = create_engine();

    service
        .upgrade_plan("777", PlanId::Premium, "pay_1")
        .await
        .unwrap();
    // leave 10 days on the clock
    store
        .update(
            "777",
            SubscriptionChanges::default().end_date(Some(Utc::now() + Duration::days(10))),
        )
        .await
        .unwrap();

    let before = Utc::now();
    let renewed = service
        .upgrade_plan("777", PlanId::Premium, "pay_2")
        .await
        .unwrap();

    let end = renewed.end_date.unwrap();
    assert!(end <= Utc::now() + Duration::days(30));
    assert!(end >= before + Duration::days(30));
    assert_eq!(renewed.last_payment_id.as_deref(), Some("pay_2"));
}

#[tokio::test]
async fn upgrade_to_free_is_rejected() {
    let (service, store) = create_engine();

    let err = service
        .upgrade_plan("777", PlanId::Free, "pay_x")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownPlan(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn upgrade_reactivates_an_expired_tenant() {
    let (service, store) = create_engine();

    service.activate_trial("555").await.unwrap();
    force_lapsed(&store, "555").await;
    service.get_or_create("555").await.unwrap();

    let record = service
        .upgrade_plan("555", PlanId::Pro, "pay_late")
        .await
        .unwrap();
    assert_eq!(record.plan, PlanId::Pro);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert!(record.end_date.unwrap() > Utc::now());
}

// ========================================================================
// Cancel
// ========================================================================

#[tokio::test]
async fn cancel_downgrades_immediately() {
    let (service, _store) = create_engine();

    service
        .upgrade_plan("777", PlanId::Premium, "pay_abc")
        .await
        .unwrap();
    let record = service.cancel("777").await.unwrap();

    assert_eq!(record.plan, PlanId::Free);
    assert_eq!(record.status, SubscriptionStatus::Cancelled);
    assert!(record.end_date.unwrap() <= Utc::now());
    // payment history survives cancellation
    assert_eq!(record.last_payment_id.as_deref(), Some("pay_abc"));

    // the very next check reflects free-tier entitlements
    assert!(!service.has_access("777", FeatureKey::ApiAccess).await.unwrap());
    assert!(!service
        .has_access("777", FeatureKey::Notifications)
        .await
        .unwrap());
}

// ========================================================================
// Feature and quota checks
// ========================================================================

#[tokio::test]
async fn feature_access_follows_the_current_plan() {
    let (service, _store) = create_engine();

    assert!(!service.has_access("1", FeatureKey::Analytics).await.unwrap());

    service.upgrade_plan("1", PlanId::Pro, "pay_1").await.unwrap();
    assert!(service.has_access("1", FeatureKey::Analytics).await.unwrap());
    assert!(!service.has_access("1", FeatureKey::ExportData).await.unwrap());

    service
        .upgrade_plan("1", PlanId::Premium, "pay_2")
        .await
        .unwrap();
    assert!(service.has_access("1", FeatureKey::ExportData).await.unwrap());
}

#[tokio::test]
async fn quota_check_is_strict_at_the_limit() {
    let (service, _store) = create_engine();

    // free tier caps orders at 15
    assert!(service.check_quota("2", QuotaKey::MaxOrders, 14).await.unwrap());
    assert!(!service.check_quota("2", QuotaKey::MaxOrders, 15).await.unwrap());
    assert!(!service.check_quota("2", QuotaKey::MaxOrders, 16).await.unwrap());
}

#[tokio::test]
async fn unlimited_quota_always_passes() {
    let (service, _store) = create_engine();

    service
        .upgrade_plan("2", PlanId::Premium, "pay_1")
        .await
        .unwrap();
    assert!(service.check_quota("2", QuotaKey::MaxOrders, 0).await.unwrap());
    assert!(service
        .check_quota("2", QuotaKey::MaxOrders, 1_000_000)
        .await
        .unwrap());
}

#[tokio::test]
async fn overview_pairs_record_with_plan_definition() {
    let (service, _store) = create_engine();

    service.upgrade_plan("9", PlanId::Pro, "pay_9").await.unwrap();
    let (record, plan) = service.overview("9").await.unwrap();
    assert_eq!(record.plan, PlanId::Pro);
    assert_eq!(plan.id, PlanId::Pro);
    assert_eq!(plan.price, 250);
}

// ========================================================================
// Entitlement gate
// ========================================================================

#[tokio::test]
async fn gate_denies_missing_feature_with_upgrade_hint() {
    let (service, _store) = create_engine();
    let gate = EntitlementGate::new(service);

    let decision = gate
        .authorize("555", Requirement::feature(FeatureKey::ApiAccess))
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Deny {
            reason: DenyReason::FeatureNotInPlan {
                feature: FeatureKey::ApiAccess
            },
            upgrade_required: true,
        }
    );
}

#[tokio::test]
async fn gate_allows_granted_feature() {
    let (service, _store) = create_engine();
    service
        .upgrade_plan("555", PlanId::Premium, "pay_1")
        .await
        .unwrap();
    let gate = EntitlementGate::new(service);

    let decision = gate
        .authorize("555", Requirement::feature(FeatureKey::ApiAccess))
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn gate_feeds_provider_count_into_the_quota_check() {
    let (service, _store) = create_engine();
    let gate = EntitlementGate::new(service);

    let decision = gate
        .authorize(
            "555",
            Requirement::quota(QuotaKey::MaxProducts, || async { Ok(4) }),
        )
        .await
        .unwrap();
    assert!(decision.is_allowed());

    // free tier caps products at 5
    let decision = gate
        .authorize(
            "555",
            Requirement::quota(QuotaKey::MaxProducts, || async { Ok(5) }),
        )
        .await
        .unwrap();
    assert_eq!(
        decision,
        Decision::Deny {
            reason: DenyReason::QuotaExceeded {
                quota: QuotaKey::MaxProducts
            },
            upgrade_required: true,
        }
    );
}

#[tokio::test]
async fn gate_propagates_provider_errors() {
    let (service, _store) = create_engine();
    let gate = EntitlementGate::new(service);

    let err = gate
        .authorize(
            "555",
            Requirement::quota(QuotaKey::MaxOrders, || async {
                Err(EngineError::Store(StoreError::Io("count source down".into())))
            }),
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

// ========================================================================
// Payment event handler
// ========================================================================

#[tokio::test]
async fn completed_payment_upgrades_the_tenant() {
    let (service, _store) = create_engine();
    let handler = PaymentEventHandler::new(service.clone());

    handler
        .deliver("subscription_901_premium", "pay_901")
        .await;

    let record = service.get_or_create("901").await.unwrap();
    assert_eq!(record.plan, PlanId::Premium);
    assert_eq!(record.last_payment_id.as_deref(), Some("pay_901"));
}

#[tokio::test]
async fn malformed_payment_events_are_dropped() {
    let (service, store) = create_engine();
    let handler = PaymentEventHandler::new(service);

    handler.deliver("subscription_abc_premium", "pay_1").await;
    handler.deliver("subscription_901_free", "pay_2").await;
    handler.deliver("subscription_901_platinum", "pay_3").await;
    handler.deliver("refund_901_premium", "pay_4").await;

    assert!(store.is_empty());
}

#[tokio::test]
async fn duplicate_delivery_resets_the_period() {
    let (service, store) = create_engine();
    let handler = PaymentEventHandler::new(service.clone());

    handler.deliver("subscription_901_pro", "pay_dup").await;
    // shrink the remaining period so the reset is observable
    store
        .update(
            "901",
            SubscriptionChanges::default().end_date(Some(Utc::now() + Duration::days(3))),
        )
        .await
        .unwrap();

    handler.deliver("subscription_901_pro", "pay_dup").await;
    let record = service.get_or_create("901").await.unwrap();
    assert!(record.end_date.unwrap() > Utc::now() + Duration::days(29));
}

// ========================================================================
// Write conflicts
// ========================================================================

/// Store wrapper that fails `update` with a write conflict a set number of
/// times, the way a store-level optimistic version check does under
/// cross-instance contention.
struct ContestedStore {
    inner: MemoryStore,
    conflicts_left: AtomicUsize,
}

impl ContestedStore {
    fn new(conflicts: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts_left: AtomicUsize::new(conflicts),
        }
    }

    fn inject_conflicts(&self, n: usize) {
        self.conflicts_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionStore for ContestedStore {
    async fn find(&self, tenant_id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.inner.find(tenant_id).await
    }

    async fn insert(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, StoreError> {
        self.inner.insert(record).await
    }

    async fn update(
        &self,
        tenant_id: &str,
        changes: SubscriptionChanges,
    ) -> Result<SubscriptionRecord, StoreError> {
        let injected = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict(tenant_id.to_string()));
        }
        self.inner.update(tenant_id, changes).await
    }
}

#[tokio::test]
async fn mutation_survives_a_single_write_conflict() {
    let store = Arc::new(ContestedStore::new(1));
    let service = SubscriptionService::new(store, Arc::new(PlanCatalog::builtin()));

    let record = service.activate_trial("555").await.unwrap();
    assert_eq!(record.plan, PlanId::Pro);
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert!(record.is_trial_used);
}

#[tokio::test]
async fn repeated_write_conflicts_surface_to_the_caller() {
    let store = Arc::new(ContestedStore::new(2));
    let service = SubscriptionService::new(store.clone(), Arc::new(PlanCatalog::builtin()));

    let err = service.activate_trial("555").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::Conflict(_))
    ));
    assert!(err.is_retryable());

    // the record was never mutated past its lazy-created default
    let record = store.inner.find("555").await.unwrap().unwrap();
    assert_eq!(record.plan, PlanId::Free);
    assert!(!record.is_trial_used);
}

#[tokio::test]
async fn lapse_normalization_survives_a_single_write_conflict() {
    let store = Arc::new(ContestedStore::new(0));
    let service = SubscriptionService::new(store.clone(), Arc::new(PlanCatalog::builtin()));

    service.activate_trial("555").await.unwrap();
    force_lapsed(&store.inner, "555").await;
    store.inject_conflicts(1);

    let record = service.get_or_create("555").await.unwrap();
    assert_eq!(record.plan, PlanId::Free);
    assert_eq!(record.status, SubscriptionStatus::Expired);
}
