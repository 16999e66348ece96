//! Subscription plan tiers and per-plan quota limits.

use serde::{Deserialize, Serialize};

use reviva_core::JobKind;

/// Subscription tier a usage counter is gated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// No active entitlement; the default for unknown users.
    Free,
    Weekly,
    Monthly,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Weekly => "weekly",
            PlanType::Monthly => "monthly",
        }
    }
}

impl core::fmt::Display for PlanType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind limits for one plan tier. `-1` denotes unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindLimits {
    pub photo: i64,
    pub video: i64,
}

impl KindLimits {
    pub fn for_kind(&self, kind: JobKind) -> i64 {
        match kind {
            JobKind::Photo => self.photo,
            JobKind::Video => self.video,
        }
    }
}

/// Quota limits per plan tier, injectable so deployments can tune them
/// without code changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub free: KindLimits,
    pub weekly: KindLimits,
    pub monthly: KindLimits,
}

impl PlanLimits {
    pub fn limit_for(&self, plan: PlanType, kind: JobKind) -> i64 {
        match plan {
            PlanType::Free => self.free.for_kind(kind),
            PlanType::Weekly => self.weekly.for_kind(kind),
            PlanType::Monthly => self.monthly.for_kind(kind),
        }
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free: KindLimits { photo: 3, video: 1 },
            weekly: KindLimits {
                photo: 50,
                video: 15,
            },
            monthly: KindLimits {
                photo: 200,
                video: 60,
            },
        }
    }
}
