use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use reviva_billing::{compute_cycle, InMemoryUsageLedger, PlanType, UsageLedger};
use reviva_core::{JobKind, ManualClock, OwnerId};

fn setup_ledger() -> (InMemoryUsageLedger, OwnerId) {
    let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(anchor));
    let ledger = InMemoryUsageLedger::new(clock);

    let owner = OwnerId::new("bench-user");
    let window = compute_cycle(anchor, PlanType::Monthly, anchor);
    ledger.upsert_plan(&owner, PlanType::Monthly, anchor, window);
    (ledger, owner)
}

fn bench_reserve_rollback_round_trip(c: &mut Criterion) {
    let (ledger, owner) = setup_ledger();

    let mut group = c.benchmark_group("usage_ledger");
    group.throughput(Throughput::Elements(1));
    group.bench_function("reserve_rollback_round_trip", |b| {
        b.iter(|| {
            let outcome = ledger.reserve(black_box(&owner), JobKind::Photo);
            ledger.rollback(&owner, JobKind::Photo);
            black_box(outcome)
        })
    });
    group.finish();
}

fn bench_cycle_computation(c: &mut Criterion) {
    let anchor = Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

    c.bench_function("compute_cycle_monthly", |b| {
        b.iter(|| compute_cycle(black_box(anchor), PlanType::Monthly, black_box(now)))
    });
}

criterion_group!(
    benches,
    bench_reserve_rollback_round_trip,
    bench_cycle_computation
);
criterion_main!(benches);
