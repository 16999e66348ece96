//! `reviva-billing` — billing cycles and metered-usage accounting.
//!
//! Two pieces live here: the pure billing-cycle calculator (the only
//! month-arithmetic in the system) and the usage ledger that enforces
//! at-most-once charging per accepted generation job.

pub mod cycle;
pub mod ledger;
pub mod plan;

pub use cycle::{compute_cycle, CycleWindow};
pub use ledger::{
    DenialReason, InMemoryUsageLedger, Reservation, UsageCounter, UsageLedger, UsageSummary,
};
pub use plan::{KindLimits, PlanLimits, PlanType};
