//! File-backed store: end-to-end cascade, restart recovery, and corruption handling.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use tierstore::{
    StoreConfig, Tier, TierConfig, TierError, TierEvent, TierEventListener, TierSpec, TierStore,
    WindowOutcome,
};

#[derive(Debug, Default)]
struct Recorder(Mutex<Vec<TierEvent>>);

impl TierEventListener for Recorder {
    fn on_event(&self, event: TierEvent) {
        self.0.lock().unwrap().push(event);
    }
}

impl Recorder {
    fn events(&self) -> Vec<TierEvent> {
        self.0.lock().unwrap().clone()
    }
}

fn two_tier_config(dir: &std::path::Path, listener: Arc<Recorder>) -> StoreConfig {
    StoreConfig {
        data_dir: dir.to_path_buf(),
        lock_stripes: 4,
        tiers: vec![
            TierSpec::new("sec", "p=1s,t=2s"),
            TierSpec::new("min", "p=1m,t=2m"),
        ],
        event_listener: listener,
    }
}

#[test]
fn cascade_reaches_the_coarsest_tier_and_exports() {
    let dir = tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let store = TierStore::open(two_tier_config(dir.path(), Arc::clone(&rec))).unwrap();
    let ids = store.create_metric().unwrap();
    assert_eq!(ids, vec![0, 0]);

    // Seconds 0..=2 fill "sec"; second 2 evicts second 0 into minute 0.
    let c = store.ingest(&ids, 0, 10).unwrap();
    assert_eq!(c.steps.len(), 1);
    assert_eq!(c.steps[0].outcome, WindowOutcome::Initialized);
    store.ingest(&ids, 1_000, 20).unwrap();
    let c = store.ingest(&ids, 2_000, 30).unwrap();
    assert_eq!(c.steps.len(), 2);
    assert_eq!(c.steps[1].timestamp_ms, 0);
    assert_eq!(c.steps[1].value, 10);
    assert_eq!(c.steps[1].outcome, WindowOutcome::Initialized);
    assert!(c.exported.is_none());

    // Walk into minute 2; the minute tier evicts minute 0 out of the chain.
    let mut exported = None;
    for s in 3..=180i64 {
        let c = store.ingest(&ids, s * 1_000, s).unwrap();
        if let Some(agg) = c.exported {
            assert!(exported.is_none(), "exported twice");
            exported = Some(agg);
        }
    }
    let agg = exported.expect("minute 0 leaves the chain");
    assert_eq!(agg.period_start, 0);
    // Seconds 0..=59 carried values 10, 20, 30, then 3..=59.
    assert_eq!(agg.count, 60);
    assert_eq!((agg.min, agg.max), (3, 59));

    let evictions = rec
        .events()
        .into_iter()
        .filter(|e| matches!(e, TierEvent::PeriodEvicted { tier, .. } if tier == "min"))
        .count();
    assert_eq!(evictions, 1);
}

#[test]
fn reopen_restores_records_and_period_marks() {
    let dir = tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let cfg = two_tier_config(dir.path(), Arc::clone(&rec));

    let (ids, before) = {
        let store = TierStore::open(cfg.clone()).unwrap();
        let a = store.create_metric().unwrap();
        let b = store.create_metric().unwrap();
        for s in 0..5i64 {
            store.ingest(&a, s * 1_000, s).unwrap();
            store.ingest(&b, 100_000 + s * 1_000, -s).unwrap();
        }
        let before: Vec<_> = [&a, &b]
            .iter()
            .map(|ids| store.tier("sec").unwrap().record_view(ids[0]).unwrap())
            .collect();
        (vec![a, b], before)
    };

    let rec2 = Arc::new(Recorder::default());
    let store = TierStore::open(two_tier_config(dir.path(), Arc::clone(&rec2))).unwrap();
    let sec = store.tier("sec").unwrap();
    assert_eq!(sec.size(), 2);
    for (ids, expected) in ids.iter().zip(&before) {
        assert_eq!(&sec.record_view(ids[0]).unwrap(), expected);
    }
    // Reopen seeds the marks from each record's current period.
    assert_eq!(sec.start_period(), Some(4_000));
    assert_eq!(sec.end_period(), Some(105_000));

    let opened = rec2
        .events()
        .into_iter()
        .find(|e| matches!(e, TierEvent::TierOpened { tier, .. } if tier == "sec"));
    assert_eq!(
        opened,
        Some(TierEvent::TierOpened {
            tier: "sec".to_string(),
            records: 2,
            start_period: Some(4_000),
            end_period: Some(105_000),
        })
    );

    // Writes continue where the first process stopped.
    let c = store.ingest(&ids[0], 5_000, 99).unwrap();
    assert!(c.steps[0].outcome.evicted().is_some());
}

#[test]
fn reopen_with_different_capacity_is_a_config_error() {
    let dir = tempdir().unwrap();
    {
        let tier = Tier::open(TierConfig::new("t", 1_000, 4), dir.path()).unwrap();
        tier.create_new_metric().unwrap();
        tier.add_value(0, 0, 1).unwrap();
    }
    let err = Tier::open(TierConfig::new("t", 1_000, 5), dir.path()).unwrap_err();
    assert!(matches!(err, TierError::Config(_)), "got {:?}", err);
}

#[test]
fn flipped_index_entry_fails_open_with_corruption() {
    let dir = tempdir().unwrap();
    {
        let tier = Tier::open(TierConfig::new("t", 1_000, 2), dir.path()).unwrap();
        tier.create_new_metric().unwrap();
        tier.create_new_metric().unwrap();
        tier.sync().unwrap();
    }
    let mut f = OpenOptions::new()
        .write(true)
        .open(dir.path().join("t.index"))
        .unwrap();
    // Inside the second entry's length field.
    f.seek(SeekFrom::End(-9)).unwrap();
    f.write_all(&[0xFF]).unwrap();
    drop(f);

    let err = Tier::open(TierConfig::new("t", 1_000, 2), dir.path()).unwrap_err();
    assert!(matches!(err, TierError::Corruption { .. }), "got {:?}", err);
    assert!(!err.is_recoverable());
}

#[test]
fn unknown_index_is_rejected_without_touching_the_store() {
    let dir = tempdir().unwrap();
    let rec = Arc::new(Recorder::default());
    let store = TierStore::open(two_tier_config(dir.path(), rec)).unwrap();
    let ids = store.create_metric().unwrap();
    store.ingest(&ids, 0, 1).unwrap();

    let err = store.ingest(&[7, 0], 0, 1).unwrap_err();
    assert!(matches!(err, TierError::InvalidIndex { index: 7, size: 1, .. }));
    assert!(err.is_recoverable());
    assert!(matches!(store.ingest(&[0], 0, 1), Err(TierError::Config(_))));
    assert_eq!(store.tier("sec").unwrap().record_view(0).unwrap().slots[0].count, 1);
}

#[test]
fn invalid_store_configs_are_rejected() {
    let dir = tempdir().unwrap();
    let mut cfg = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        tiers: vec![TierSpec::new("a", "p=1m,t=1h"), TierSpec::new("a", "p=1h,t=1d")],
        ..StoreConfig::default()
    };
    assert!(matches!(TierStore::open(cfg.clone()), Err(TierError::Config(_))));

    cfg.tiers = vec![TierSpec::new("a", "p=1h,t=1d"), TierSpec::new("b", "p=1m,t=1h")];
    assert!(matches!(TierStore::open(cfg.clone()), Err(TierError::Config(_))));

    cfg.tiers.clear();
    assert!(matches!(TierStore::open(cfg), Err(TierError::Config(_))));
}
