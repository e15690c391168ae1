//! Subscription store contract and implementations
//!
//! The store is a dumb keyed record store: it persists
//! [`SubscriptionRecord`]s by tenant id and applies
//! [`SubscriptionChanges`] mechanically. All business rules live in the
//! service layer; the store only guarantees at-most-one record per tenant
//! and single-record atomicity.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{SubscriptionChanges, SubscriptionRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Store failure modes
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record for this tenant id
    #[error("No subscription record for tenant: {0}")]
    NotFound(String),

    /// A record for this tenant id already exists
    #[error("Subscription record already exists for tenant: {0}")]
    AlreadyExists(String),

    /// Concurrent write conflict; the read-modify-write cycle may be retried
    #[error("Concurrent write conflict for tenant: {0}")]
    Conflict(String),

    /// Transient I/O failure, propagated unchanged
    #[error("Store I/O error: {0}")]
    Io(#[source] BoxError),
}

/// Keyed record store holding one subscription per tenant
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Look up a tenant's record
    async fn find(&self, tenant_id: &str) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Insert a new record; fails with [`StoreError::AlreadyExists`] on key collision
    async fn insert(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, StoreError>;

    /// Apply a partial update; fails with [`StoreError::NotFound`] if absent
    async fn update(
        &self,
        tenant_id: &str,
        changes: SubscriptionChanges,
    ) -> Result<SubscriptionRecord, StoreError>;
}
