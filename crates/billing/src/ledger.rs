//! Usage ledger: per-(owner, kind) quota counters with atomic reservations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reviva_core::{Clock, JobKind, OwnerId};

use crate::cycle::{compute_cycle, CycleWindow};
use crate::plan::{PlanLimits, PlanType};

/// One quota row, scoped to a billing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub plan: PlanType,
    pub used: i64,
    /// `-1` denotes unlimited.
    pub limit: i64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    /// Original purchase instant (first-use instant for the free tier);
    /// every window is derived from it.
    pub anchor: DateTime<Utc>,
    pub last_reset_at: DateTime<Utc>,
}

impl UsageCounter {
    pub fn remaining(&self) -> Option<i64> {
        if self.limit < 0 {
            None
        } else {
            Some((self.limit - self.used).max(0))
        }
    }
}

/// Outcome of a quota reservation. Denial is an expected, frequent result,
/// so it is a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Allowed,
    Denied(DenialReason),
}

impl Reservation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    QuotaExceeded,
}

/// Display-only usage snapshot for one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub kind: JobKind,
    pub plan: PlanType,
    pub used: i64,
    pub limit: i64,
    pub remaining: Option<i64>,
    pub cycle_end: DateTime<Utc>,
}

/// Quota accounting seam consumed by the tracker and the reconciler.
///
/// Every operation must be atomic with respect to concurrent calls for the
/// same (owner, kind): two racing reservations on a counter with one slot
/// left must admit exactly one.
pub trait UsageLedger: Send + Sync {
    /// Reserve one unit of usage, creating the counter on first use.
    fn reserve(&self, owner: &OwnerId, kind: JobKind) -> Reservation;

    /// Undo a reservation whose job failed before producing a result.
    /// Floored at zero.
    fn rollback(&self, owner: &OwnerId, kind: JobKind);

    /// Fold an alias row into the canonical owner's row (account transfer).
    /// A no-op when the alias row is absent, so replays converge.
    fn merge_into(&self, canonical: &OwnerId, alias: &OwnerId, kind: JobKind);

    /// Set plan and billing window for every kind the owner tracks,
    /// resetting `used` when a new cycle has begun.
    fn upsert_plan(
        &self,
        owner: &OwnerId,
        plan: PlanType,
        anchor: DateTime<Utc>,
        window: CycleWindow,
    );

    /// Revert gating to free-tier limits without touching historical usage.
    fn deactivate(&self, owner: &OwnerId);

    /// Read-only snapshot of one counter.
    fn counter(&self, owner: &OwnerId, kind: JobKind) -> Option<UsageCounter>;
}

/// In-memory ledger. Each operation is a single lock-held read-modify-write,
/// which is what makes reservations race-safe.
pub struct InMemoryUsageLedger {
    clock: Arc<dyn Clock>,
    limits: PlanLimits,
    rows: Mutex<HashMap<(OwnerId, JobKind), UsageCounter>>,
}

impl InMemoryUsageLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, PlanLimits::default())
    }

    pub fn with_limits(clock: Arc<dyn Clock>, limits: PlanLimits) -> Self {
        Self {
            clock,
            limits,
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Usage snapshot across all kinds, for UI display.
    pub fn summary(&self, owner: &OwnerId) -> Vec<UsageSummary> {
        let rows = self.rows.lock().unwrap();
        JobKind::ALL
            .iter()
            .filter_map(|kind| {
                rows.get(&(owner.clone(), *kind)).map(|c| UsageSummary {
                    kind: *kind,
                    plan: c.plan,
                    used: c.used,
                    limit: c.limit,
                    remaining: c.remaining(),
                    cycle_end: c.cycle_end,
                })
            })
            .collect()
    }

    fn fresh_counter(&self, kind: JobKind, now: DateTime<Utc>) -> UsageCounter {
        // Missing counter is treated as first use on the free tier.
        let window = compute_cycle(now, PlanType::Free, now);
        UsageCounter {
            plan: PlanType::Free,
            used: 0,
            limit: self.limits.limit_for(PlanType::Free, kind),
            cycle_start: window.start,
            cycle_end: window.end,
            anchor: now,
            last_reset_at: now,
        }
    }

    fn refresh_if_stale(counter: &mut UsageCounter, now: DateTime<Utc>) {
        if now < counter.cycle_end && now >= counter.cycle_start {
            return;
        }
        let window = compute_cycle(counter.anchor, counter.plan, now);
        counter.cycle_start = window.start;
        counter.cycle_end = window.end;
        counter.used = 0;
        counter.last_reset_at = now;
    }
}

impl UsageLedger for InMemoryUsageLedger {
    fn reserve(&self, owner: &OwnerId, kind: JobKind) -> Reservation {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let counter = rows
            .entry((owner.clone(), kind))
            .or_insert_with(|| self.fresh_counter(kind, now));

        Self::refresh_if_stale(counter, now);

        if counter.limit >= 0 && counter.used >= counter.limit {
            debug!(owner = %owner, kind = %kind, used = counter.used, limit = counter.limit, "reservation denied");
            return Reservation::Denied(DenialReason::QuotaExceeded);
        }

        counter.used += 1;
        debug!(owner = %owner, kind = %kind, used = counter.used, "reservation allowed");
        Reservation::Allowed
    }

    fn rollback(&self, owner: &OwnerId, kind: JobKind) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(counter) = rows.get_mut(&(owner.clone(), kind)) {
            counter.used = (counter.used - 1).max(0);
            debug!(owner = %owner, kind = %kind, used = counter.used, "reservation rolled back");
        }
    }

    fn merge_into(&self, canonical: &OwnerId, alias: &OwnerId, kind: JobKind) {
        let mut rows = self.rows.lock().unwrap();
        let Some(alias_row) = rows.remove(&(alias.clone(), kind)) else {
            // Already merged (or never existed); replays land here.
            return;
        };

        let merged = match rows.remove(&(canonical.clone(), kind)) {
            Some(canonical_row) => UsageCounter {
                used: canonical_row.used.max(alias_row.used),
                ..alias_row
            },
            None => alias_row,
        };

        info!(canonical = %canonical, alias = %alias, kind = %kind, used = merged.used, "merged usage row");
        rows.insert((canonical.clone(), kind), merged);
    }

    fn upsert_plan(
        &self,
        owner: &OwnerId,
        plan: PlanType,
        anchor: DateTime<Utc>,
        window: CycleWindow,
    ) {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();

        for kind in JobKind::ALL {
            let counter = rows
                .entry((owner.clone(), kind))
                .or_insert_with(|| self.fresh_counter(kind, now));

            let new_cycle =
                counter.cycle_start != window.start || counter.cycle_end != window.end;
            if new_cycle {
                counter.used = 0;
                counter.last_reset_at = now;
            }

            counter.plan = plan;
            counter.limit = self.limits.limit_for(plan, kind);
            counter.anchor = anchor;
            counter.cycle_start = window.start;
            counter.cycle_end = window.end;
        }

        info!(owner = %owner, plan = %plan, cycle_end = %window.end, "plan upserted");
    }

    fn deactivate(&self, owner: &OwnerId) {
        let mut rows = self.rows.lock().unwrap();
        for kind in JobKind::ALL {
            if let Some(counter) = rows.get_mut(&(owner.clone(), kind)) {
                counter.plan = PlanType::Free;
                counter.limit = self.limits.limit_for(PlanType::Free, kind);
            }
        }
        info!(owner = %owner, "entitlement deactivated; free-tier gating applies");
    }

    fn counter(&self, owner: &OwnerId, kind: JobKind) -> Option<UsageCounter> {
        self.rows.lock().unwrap().get(&(owner.clone(), kind)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use reviva_core::ManualClock;

    fn owner(raw: &str) -> OwnerId {
        OwnerId::new(raw)
    }

    fn start_of_2025() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn ledger_at(start: DateTime<Utc>) -> (Arc<ManualClock>, InMemoryUsageLedger) {
        let clock = Arc::new(ManualClock::new(start));
        let ledger = InMemoryUsageLedger::new(clock.clone());
        (clock, ledger)
    }

    #[test]
    fn first_reservation_creates_free_counter() {
        let (_clock, ledger) = ledger_at(start_of_2025());
        let user = owner("user-1");

        assert!(ledger.reserve(&user, JobKind::Photo).is_allowed());

        let counter = ledger.counter(&user, JobKind::Photo).unwrap();
        assert_eq!(counter.plan, PlanType::Free);
        assert_eq!(counter.used, 1);
        assert_eq!(counter.limit, PlanLimits::default().free.photo);
    }

    #[test]
    fn reservation_denied_at_limit() {
        let (_clock, ledger) = ledger_at(start_of_2025());
        let user = owner("user-1");
        let limit = PlanLimits::default().free.photo;

        for _ in 0..limit {
            assert!(ledger.reserve(&user, JobKind::Photo).is_allowed());
        }
        assert_eq!(
            ledger.reserve(&user, JobKind::Photo),
            Reservation::Denied(DenialReason::QuotaExceeded)
        );
    }

    #[test]
    fn unlimited_plan_is_never_denied() {
        let clock = Arc::new(ManualClock::new(start_of_2025()));
        let limits = PlanLimits {
            monthly: crate::plan::KindLimits {
                photo: -1,
                video: -1,
            },
            ..PlanLimits::default()
        };
        let ledger = InMemoryUsageLedger::with_limits(clock.clone(), limits);
        let user = owner("vip");

        let window = compute_cycle(start_of_2025(), PlanType::Monthly, start_of_2025());
        ledger.upsert_plan(&user, PlanType::Monthly, start_of_2025(), window);

        for _ in 0..1_000 {
            assert!(ledger.reserve(&user, JobKind::Video).is_allowed());
        }
    }

    #[test]
    fn rollback_is_round_trip_neutral_and_floored() {
        let (_clock, ledger) = ledger_at(start_of_2025());
        let user = owner("user-1");

        assert!(ledger.reserve(&user, JobKind::Video).is_allowed());
        let before = ledger.counter(&user, JobKind::Video).unwrap().used;

        assert!(ledger.reserve(&user, JobKind::Video).is_allowed());
        ledger.rollback(&user, JobKind::Video);
        assert_eq!(ledger.counter(&user, JobKind::Video).unwrap().used, before);

        // Floored at zero even if rolled back more times than reserved.
        ledger.rollback(&user, JobKind::Video);
        ledger.rollback(&user, JobKind::Video);
        ledger.rollback(&user, JobKind::Video);
        assert_eq!(ledger.counter(&user, JobKind::Video).unwrap().used, 0);
    }

    #[test]
    fn concurrent_reservations_never_over_admit() {
        let clock = Arc::new(ManualClock::new(start_of_2025()));
        let limits = PlanLimits {
            free: crate::plan::KindLimits { photo: 5, video: 1 },
            ..PlanLimits::default()
        };
        let ledger = Arc::new(InMemoryUsageLedger::with_limits(clock, limits));
        let user = owner("racer");

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            let user = user.clone();
            handles.push(std::thread::spawn(move || {
                ledger.reserve(&user, JobKind::Photo).is_allowed()
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(ledger.counter(&user, JobKind::Photo).unwrap().used, 5);
    }

    #[test]
    fn stale_cycle_resets_before_evaluating() {
        let anchor = Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap();
        let (clock, ledger) = ledger_at(anchor);
        let user = owner("monthly-user");

        let limits = PlanLimits::default();
        let window = compute_cycle(anchor, PlanType::Monthly, anchor);
        ledger.upsert_plan(&user, PlanType::Monthly, anchor, window);

        for _ in 0..limits.monthly.photo {
            assert!(ledger.reserve(&user, JobKind::Photo).is_allowed());
        }

        // Feb 1: still inside the Jan 31 -> Feb 28 window; denied.
        clock.set(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(
            ledger.reserve(&user, JobKind::Photo),
            Reservation::Denied(DenialReason::QuotaExceeded)
        );

        // Mar 1: the Feb 28 -> Mar 31 window has begun; counter resets.
        clock.set(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert!(ledger.reserve(&user, JobKind::Photo).is_allowed());

        let counter = ledger.counter(&user, JobKind::Photo).unwrap();
        assert_eq!(counter.used, 1);
        assert_eq!(
            counter.cycle_start,
            Utc.with_ymd_and_hms(2025, 2, 28, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn merge_into_takes_max_usage_and_is_idempotent() {
        let (_clock, ledger) = ledger_at(start_of_2025());
        let canonical = owner("canonical");
        let old_a = owner("alias-a");
        let old_b = owner("alias-b");

        // canonical used=2, alias-a used=3, alias-b used=7.
        for _ in 0..2 {
            ledger.reserve(&canonical, JobKind::Photo);
        }
        for _ in 0..3 {
            ledger.reserve(&old_a, JobKind::Photo);
        }
        // Free photo limit is 3; give alias-b headroom via a plan first.
        let window = compute_cycle(start_of_2025(), PlanType::Monthly, start_of_2025());
        ledger.upsert_plan(&old_b, PlanType::Monthly, start_of_2025(), window);
        for _ in 0..7 {
            ledger.reserve(&old_b, JobKind::Photo);
        }

        ledger.merge_into(&canonical, &old_a, JobKind::Photo);
        ledger.merge_into(&canonical, &old_b, JobKind::Photo);

        let counter = ledger.counter(&canonical, JobKind::Photo).unwrap();
        assert_eq!(counter.used, 7);
        assert_eq!(counter.plan, PlanType::Monthly);
        assert!(ledger.counter(&old_a, JobKind::Photo).is_none());
        assert!(ledger.counter(&old_b, JobKind::Photo).is_none());

        // Replaying the merge changes nothing.
        ledger.merge_into(&canonical, &old_b, JobKind::Photo);
        assert_eq!(ledger.counter(&canonical, JobKind::Photo).unwrap().used, 7);
    }

    #[test]
    fn upsert_plan_resets_usage_only_on_new_window() {
        let anchor = start_of_2025();
        let (_clock, ledger) = ledger_at(anchor);
        let user = owner("subscriber");

        let window = compute_cycle(anchor, PlanType::Weekly, anchor);
        ledger.upsert_plan(&user, PlanType::Weekly, anchor, window);
        ledger.reserve(&user, JobKind::Photo);
        ledger.reserve(&user, JobKind::Photo);

        // Same window replayed (e.g. a retried renewal event): usage kept.
        ledger.upsert_plan(&user, PlanType::Weekly, anchor, window);
        assert_eq!(ledger.counter(&user, JobKind::Photo).unwrap().used, 2);

        // A later window: usage reset.
        let next = CycleWindow {
            start: window.start + Duration::days(7),
            end: window.end + Duration::days(7),
        };
        ledger.upsert_plan(&user, PlanType::Weekly, anchor, next);
        assert_eq!(ledger.counter(&user, JobKind::Photo).unwrap().used, 0);
    }

    #[test]
    fn deactivate_reverts_to_free_gating_but_keeps_usage() {
        let anchor = start_of_2025();
        let (_clock, ledger) = ledger_at(anchor);
        let user = owner("churned");

        let window = compute_cycle(anchor, PlanType::Monthly, anchor);
        ledger.upsert_plan(&user, PlanType::Monthly, anchor, window);
        for _ in 0..10 {
            ledger.reserve(&user, JobKind::Photo);
        }

        ledger.deactivate(&user);

        let counter = ledger.counter(&user, JobKind::Photo).unwrap();
        assert_eq!(counter.plan, PlanType::Free);
        assert_eq!(counter.used, 10);
        // 10 used against a free limit of 3: next reservation is denied.
        assert_eq!(
            ledger.reserve(&user, JobKind::Photo),
            Reservation::Denied(DenialReason::QuotaExceeded)
        );
    }
}
