//! Plan catalog: the three subscription tiers and what they grant
//!
//! The catalog is built once at process start ([`PlanCatalog::builtin`]) and
//! shared by reference afterwards. Lookups by [`PlanId`] cannot fail; string
//! inputs are validated at the parse boundary instead, so a typo'd plan or
//! capability name surfaces as an explicit error rather than a silent deny.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Length of the one-time free trial, in days
pub const TRIAL_PERIOD_DAYS: i64 = 7;

/// Registered plan tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Pro,
    Premium,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Pro => "pro",
            PlanId::Premium => "premium",
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanId::Free),
            "pro" => Ok(PlanId::Pro),
            "premium" => Ok(PlanId::Premium),
            other => Err(EngineError::UnknownPlan(other.to_string())),
        }
    }
}

/// Boolean feature flags a plan can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKey {
    /// Customer notifications
    Notifications,
    /// Custom message templates
    Templates,
    /// Extended analytics
    Analytics,
    /// Automatic backups
    Backups,
    /// REST API access
    ApiAccess,
    /// Excel/CSV data export
    ExportData,
    /// Multi-user team access
    MultiUser,
    /// Remove product branding
    WhiteLabel,
}

impl FeatureKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::Notifications => "notifications",
            FeatureKey::Templates => "templates",
            FeatureKey::Analytics => "analytics",
            FeatureKey::Backups => "backups",
            FeatureKey::ApiAccess => "apiAccess",
            FeatureKey::ExportData => "exportData",
            FeatureKey::MultiUser => "multiUser",
            FeatureKey::WhiteLabel => "whiteLabel",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notifications" => Ok(FeatureKey::Notifications),
            "templates" => Ok(FeatureKey::Templates),
            "analytics" => Ok(FeatureKey::Analytics),
            "backups" => Ok(FeatureKey::Backups),
            "apiAccess" => Ok(FeatureKey::ApiAccess),
            "exportData" => Ok(FeatureKey::ExportData),
            "multiUser" => Ok(FeatureKey::MultiUser),
            "whiteLabel" => Ok(FeatureKey::WhiteLabel),
            other => Err(EngineError::UnknownCapability(other.to_string())),
        }
    }
}

/// Countable resources a plan can cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaKey {
    MaxOrders,
    MaxCustomers,
    MaxProducts,
}

impl QuotaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKey::MaxOrders => "maxOrders",
            QuotaKey::MaxCustomers => "maxCustomers",
            QuotaKey::MaxProducts => "maxProducts",
        }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maxOrders" => Ok(QuotaKey::MaxOrders),
            "maxCustomers" => Ok(QuotaKey::MaxCustomers),
            "maxProducts" => Ok(QuotaKey::MaxProducts),
            other => Err(EngineError::UnknownCapability(other.to_string())),
        }
    }
}

/// Support level bundled with a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportTier {
    Basic,
    Priority,
    Vip,
}

/// Feature-flag bundle of a plan
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub notifications: bool,
    pub templates: bool,
    pub analytics: bool,
    pub backups: bool,
    pub api_access: bool,
    pub export_data: bool,
    pub multi_user: bool,
    pub white_label: bool,
}

impl FeatureSet {
    pub fn get(&self, key: FeatureKey) -> bool {
        match key {
            FeatureKey::Notifications => self.notifications,
            FeatureKey::Templates => self.templates,
            FeatureKey::Analytics => self.analytics,
            FeatureKey::Backups => self.backups,
            FeatureKey::ApiAccess => self.api_access,
            FeatureKey::ExportData => self.export_data,
            FeatureKey::MultiUser => self.multi_user,
            FeatureKey::WhiteLabel => self.white_label,
        }
    }
}

/// Quota bundle of a plan; `None` = unlimited
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSet {
    pub max_orders: Option<u32>,
    pub max_customers: Option<u32>,
    pub max_products: Option<u32>,
}

impl QuotaSet {
    pub fn get(&self, key: QuotaKey) -> Option<u32> {
        match key {
            QuotaKey::MaxOrders => self.max_orders,
            QuotaKey::MaxCustomers => self.max_customers,
            QuotaKey::MaxProducts => self.max_products,
        }
    }
}

/// Immutable definition of one plan tier
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    pub id: PlanId,
    pub name: &'static str,
    /// Price in Telegram Stars
    pub price: u32,
    pub currency: &'static str,
    /// 0 = non-expiring
    pub duration_days: u32,
    pub support: SupportTier,
    pub features: FeatureSet,
    pub quotas: QuotaSet,
}

/// Registry of the three plan tiers, constructed once at startup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: [PlanDefinition; 3],
}

impl PlanCatalog {
    /// Built-in seed data (static configuration, never mutated at runtime)
    pub fn builtin() -> Self {
        Self {
            plans: [
                PlanDefinition {
                    id: PlanId::Free,
                    name: "Free",
                    price: 0,
                    currency: "XTR",
                    duration_days: 0,
                    support: SupportTier::Basic,
                    features: FeatureSet {
                        notifications: false,
                        templates: false,
                        analytics: false,
                        backups: false,
                        api_access: false,
                        export_data: false,
                        multi_user: false,
                        white_label: false,
                    },
                    quotas: QuotaSet {
                        max_orders: Some(15),
                        max_customers: Some(15),
                        max_products: Some(5),
                    },
                },
                PlanDefinition {
                    id: PlanId::Pro,
                    name: "PRO",
                    price: 250,
                    currency: "XTR",
                    duration_days: 30,
                    support: SupportTier::Priority,
                    features: FeatureSet {
                        notifications: true,
                        templates: true,
                        analytics: true,
                        backups: true,
                        api_access: false,
                        export_data: false,
                        multi_user: false,
                        white_label: false,
                    },
                    quotas: QuotaSet {
                        max_orders: Some(500),
                        max_customers: Some(200),
                        max_products: Some(100),
                    },
                },
                PlanDefinition {
                    id: PlanId::Premium,
                    name: "PREMIUM",
                    price: 400,
                    currency: "XTR",
                    duration_days: 30,
                    support: SupportTier::Vip,
                    features: FeatureSet {
                        notifications: true,
                        templates: true,
                        analytics: true,
                        backups: true,
                        api_access: true,
                        export_data: true,
                        multi_user: true,
                        white_label: true,
                    },
                    quotas: QuotaSet {
                        max_orders: None,
                        max_customers: None,
                        max_products: None,
                    },
                },
            ],
        }
    }

    /// Resolve a plan definition; infallible on the closed [`PlanId`] set
    pub fn lookup(&self, id: PlanId) -> &PlanDefinition {
        match id {
            PlanId::Free => &self.plans[0],
            PlanId::Pro => &self.plans[1],
            PlanId::Premium => &self.plans[2],
        }
    }

    /// Resolve a plan definition from its wire name
    pub fn lookup_str(&self, id: &str) -> Result<&PlanDefinition, EngineError> {
        Ok(self.lookup(id.parse()?))
    }

    /// All plan definitions, in tier order (what a plans listing endpoint returns)
    pub fn plans(&self) -> &[PlanDefinition] {
        &self.plans
    }
}
