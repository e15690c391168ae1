//! In-memory subscription store for tests and local development

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{StoreError, SubscriptionStore};
use crate::record::{SubscriptionChanges, SubscriptionRecord};

/// DashMap-backed store; single-record atomicity comes from the map's
/// per-shard locking
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, SubscriptionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find(&self, tenant_id: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self.records.get(tenant_id).map(|r| r.clone()))
    }

    async fn insert(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, StoreError> {
        match self.records.entry(record.tenant_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.tenant_id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        tenant_id: &str,
        changes: SubscriptionChanges,
    ) -> Result<SubscriptionRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(tenant_id)
            .ok_or_else(|| StoreError::NotFound(tenant_id.to_string()))?;
        changes.apply(entry.value_mut(), Utc::now());
        Ok(entry.clone())
    }
}
