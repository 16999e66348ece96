//! Billing-cycle window computation.
//!
//! This is the only month-arithmetic in the system and the most off-by-one
//! prone, so it is a single pure function with exhaustive tests. Callers pass
//! `now` explicitly; identical inputs always produce identical windows, which
//! is what makes reconciliation replay idempotent.

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanType;

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// A half-open billing window: `start <= now < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CycleWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Compute the billing window containing `now` for a plan anchored at the
/// original purchase instant.
///
/// Weekly plans use exact 7-day periods from the anchor. Monthly plans (and
/// the free tier, which resets on monthly windows anchored at first use) fall
/// on the anchor's day-of-month; when that day does not exist in a target
/// month the boundary clamps to the month's last day. Boundaries are always
/// derived by adding whole months to the *anchor*, never to an already
/// clamped boundary, so the anchor day is not lost after a short month.
pub fn compute_cycle(anchor: DateTime<Utc>, plan: PlanType, now: DateTime<Utc>) -> CycleWindow {
    match plan {
        PlanType::Weekly => weekly_window(anchor, now),
        PlanType::Monthly | PlanType::Free => monthly_window(anchor, now),
    }
}

fn weekly_window(anchor: DateTime<Utc>, now: DateTime<Utc>) -> CycleWindow {
    // Euclidean floor keeps `start <= now` even when `now` precedes the
    // anchor (clock skew).
    let elapsed_ms = (now - anchor).num_milliseconds();
    let periods = elapsed_ms.div_euclid(WEEK_MS);
    let start = anchor + Duration::milliseconds(periods * WEEK_MS);
    CycleWindow {
        start,
        end: start + Duration::milliseconds(WEEK_MS),
    }
}

fn monthly_window(anchor: DateTime<Utc>, now: DateTime<Utc>) -> CycleWindow {
    let mut months = months_between(anchor, now);
    let mut start = anchor_plus_months(anchor, months);

    // Forward rounding can overshoot when `now` sits before the anchor day
    // in its month (or behind the anchor entirely); step back one month.
    if start > now {
        months -= 1;
        start = anchor_plus_months(anchor, months);
    }

    CycleWindow {
        start,
        end: anchor_plus_months(anchor, months + 1),
    }
}

fn months_between(anchor: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    (now.year() - anchor.year()) * 12 + now.month() as i32 - anchor.month() as i32
}

fn anchor_plus_months(anchor: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let shifted = if months >= 0 {
        anchor.checked_add_months(Months::new(months as u32))
    } else {
        anchor.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(anchor)
}
