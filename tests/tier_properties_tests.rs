use proptest::prelude::*;

use tierstore::codec::TierRecordCodec;
use tierstore::{
    MemoryLog, PeriodAggregate, PeriodWindow, Tier, TierConfig, TierRecord, WindowOutcome,
};

const PERIOD: i64 = 1_000;

fn samples() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((-20_000i64..60_000, -1_000i64..1_000), 1..150)
}

/// Feeds `ops` through a tier and, in parallel, through the window on a plain record.
fn run_both(capacity: usize, ops: &[(i64, i64)]) -> (Tier, TierRecord, Vec<WindowOutcome>) {
    let tier = Tier::new(
        TierConfig::new("prop", PERIOD, capacity),
        Box::new(MemoryLog::new()),
    )
    .unwrap();
    let idx = tier.create_new_metric().unwrap();
    let window = PeriodWindow::new(PERIOD, capacity);
    let mut model = TierRecord::default();
    let mut outcomes = Vec::new();
    for &(ts, v) in ops {
        let got = tier.accept(idx, ts, v).unwrap();
        let expected = window.accept(&mut model, window.period_of(ts).unwrap(), v).unwrap();
        assert_eq!(got, expected);
        outcomes.push(got);
    }
    (tier, model, outcomes)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 1000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_stored_record_matches_in_memory_window(capacity in 1usize..6, ops in samples()) {
        let (tier, model, _) = run_both(capacity, &ops);
        prop_assert_eq!(tier.record_view(0).unwrap(), model);
    }

    #[test]
    fn prop_slot_count_bounded_and_periods_strictly_decrease(capacity in 1usize..6, ops in samples()) {
        let (tier, _, _) = run_both(capacity, &ops);
        let view = tier.record_view(0).unwrap();
        prop_assert!(view.slots.len() <= capacity);
        prop_assert_eq!(view.header.slot_count as usize, view.slots.len());
        for w in view.slots.windows(2) {
            prop_assert!(w[0].period_start > w[1].period_start);
        }
        let values = tier.get_values(0).unwrap();
        for w in values.windows(2) {
            prop_assert!(w[0].period_start < w[1].period_start);
        }
        prop_assert_eq!(values.len(), view.slots.len().saturating_sub(1));
    }

    #[test]
    fn prop_late_samples_never_mutate_or_evict(capacity in 1usize..6, ops in samples(), late in 1i64..10) {
        let (tier, _, _) = run_both(capacity, &ops);
        let before = tier.record_view(0).unwrap();
        let current = before.slots[0].period_start;
        let outcome = tier.accept(0, current - late * PERIOD, 12345).unwrap();
        prop_assert_eq!(outcome, WindowOutcome::Dropped);
        prop_assert_eq!(tier.record_view(0).unwrap(), before);
    }

    #[test]
    fn prop_evictions_only_when_full(capacity in 1usize..6, ops in samples()) {
        let (_, _, outcomes) = run_both(capacity, &ops);
        let mut slots = 0usize;
        for o in outcomes {
            match o {
                WindowOutcome::Initialized => slots = 1,
                WindowOutcome::RolledNoEviction => {
                    prop_assert!(slots < capacity);
                    slots += 1;
                }
                WindowOutcome::RolledWithEviction(_) => prop_assert_eq!(slots, capacity),
                WindowOutcome::UpdatedInPlace | WindowOutcome::Dropped => {}
            }
        }
    }

    #[test]
    fn prop_encoded_record_round_trips(capacity in 1usize..6, ops in samples()) {
        let (_, model, _) = run_both(capacity, &ops);
        let codec = TierRecordCodec::new(capacity);
        let bytes = codec.encode_record(&model).unwrap();
        let decoded = codec.decode_record(&bytes).unwrap();
        prop_assert_eq!(codec.encode_record(&decoded).unwrap(), bytes);
    }

    #[test]
    fn prop_counts_sum_to_accepted_samples(ops in samples()) {
        // Capacity large enough that nothing is evicted.
        let (tier, _, outcomes) = run_both(128, &ops);
        let accepted = outcomes.iter().filter(|o| !o.is_dropped()).count() as u64;
        let view = tier.record_view(0).unwrap();
        let stored: u64 = view.slots.iter().map(|s| s.count).sum();
        prop_assert_eq!(stored, accepted);
    }
}

#[test]
fn roll_eviction_exactness_capacity_three() {
    let (_, _, outcomes) = run_both(3, &[(0, 0), (1_000, 1), (2_000, 2), (3_000, 3), (4_000, 4)]);
    assert_eq!(
        outcomes,
        vec![
            WindowOutcome::Initialized,
            WindowOutcome::RolledNoEviction,
            WindowOutcome::RolledNoEviction,
            WindowOutcome::RolledWithEviction(PeriodAggregate::first(0, 0)),
            WindowOutcome::RolledWithEviction(PeriodAggregate::first(1_000, 1)),
        ]
    );
}

#[test]
fn in_place_aggregate_recurrence() {
    let (tier, _, _) = run_both(1, &[(0, 10), (1, 30), (2, 5)]);
    let s = tier.record_view(0).unwrap().slots[0];
    assert_eq!((s.min, s.max, s.count, s.avg), (5, 30, 3, 15));

    let (tier, _, _) = run_both(1, &[(0, 10), (1, 20), (2, 1)]);
    assert_eq!(tier.record_view(0).unwrap().slots[0].avg, 8);
}
