//! Engine-level error type
//!
//! `EngineError` separates permanent business-rule violations (the caller
//! must not retry unchanged) from store failures, which carry their own
//! retryability via [`StoreError`](crate::store::StoreError).

use thiserror::Error;

use crate::store::StoreError;

/// Business-rule and infrastructure errors surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tenant's one-time trial has already been consumed
    #[error("Trial already used")]
    TrialAlreadyUsed,

    /// Plan id is not one of the registered catalog entries
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// Feature or quota key is not part of the closed capability set
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// No record for this tenant (only reachable by bypassing lazy creation)
    #[error("Subscription record not found for tenant: {0}")]
    TenantRecordNotFound(String),

    /// Store failure, propagated unchanged
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether retrying the same call can succeed without caller changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::Conflict(_)) | EngineError::Store(StoreError::Io(_))
        )
    }
}

/// Convenience alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;
