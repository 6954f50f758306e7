
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::TempDir;
use tierstore::{Tier, TierChain, TierConfig};

const METRICS: u64 = 64;

fn memory_chain() -> (TierChain, Vec<Vec<u64>>) {
    let chain = TierChain::new(vec![
        Tier::in_memory(TierConfig::from_pattern("minute", "p=1m,t=1h").unwrap()).unwrap(),
        Tier::in_memory(TierConfig::from_pattern("hour", "p=1h,t=1d").unwrap()).unwrap(),
        Tier::in_memory(TierConfig::from_pattern("day", "p=1d,t=4w").unwrap()).unwrap(),
    ])
    .unwrap();
    let ids = (0..METRICS).map(|_| chain.create_metric().unwrap()).collect();
    (chain, ids)
}

fn bench_add_value(c: &mut Criterion) {
    // One sample every 250ms: mostly in-place updates, a roll every 240 points.
    let ops = datasets::generate_samples(datasets::DEFAULT_SEED, 50_000, METRICS, 250, 97);

    #[derive(Debug)]
    struct Fixture {
        _dir: TempDir,
        tier: Tier,
    }

    let mut group = c.benchmark_group("add_value");

    group.bench_function("memory_50k", |b| {
        b.iter_batched(
            || {
                let tier =
                    Tier::in_memory(TierConfig::from_pattern("minute", "p=1m,t=1h").unwrap())
                        .unwrap();
                for _ in 0..METRICS {
                    tier.create_new_metric().unwrap();
                }
                tier
            },
            |tier| {
                for op in &ops {
                    tier.add_value(black_box(op.metric), black_box(op.ts), black_box(op.val))
                        .unwrap();
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("file_50k", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let cfg = TierConfig::from_pattern("minute", "p=1m,t=1h").unwrap();
                let tier = Tier::open(cfg, dir.path()).expect("tier open");
                for _ in 0..METRICS {
                    tier.create_new_metric().unwrap();
                }
                Fixture { _dir: dir, tier }
            },
            |fx| {
                for op in &ops {
                    fx.tier
                        .add_value(black_box(op.metric), black_box(op.ts), black_box(op.val))
                        .unwrap();
                }
                fx.tier.sync().unwrap();
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_chain_ingest(c: &mut Criterion) {
    // One sample per 10s over ~12 days, so samples cascade into the day tier.
    let ops = datasets::generate_samples(datasets::DEFAULT_SEED, 100_000, METRICS, 10_000, 1_000);

    let mut group = c.benchmark_group("chain_ingest");
    group.sample_size(20);

    group.bench_function("three_tiers_100k", |b| {
        b.iter_batched(
            memory_chain,
            |(chain, ids)| {
                for op in &ops {
                    chain
                        .ingest(black_box(&ids[op.metric as usize]), op.ts, op.val)
                        .unwrap();
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

fn bench_get_values(c: &mut Criterion) {
    let ops = datasets::generate_samples(datasets::DEFAULT_SEED, 200_000, METRICS, 1_000, 1_000);
    let (chain, ids) = memory_chain();
    for op in &ops {
        chain.ingest(&ids[op.metric as usize], op.ts, op.val).unwrap();
    }
    let minute = chain.tier(0).unwrap();

    let mut group = c.benchmark_group("read");
    group.bench_function("get_values_full_record", |b| {
        b.iter(|| {
            for idx in 0..METRICS {
                black_box(minute.get_values(black_box(idx)).unwrap());
            }
        })
    });
    group.bench_function("dump_with_periods", |b| {
        b.iter(|| black_box(minute.dump(black_box(7), true).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_add_value, bench_chain_ingest, bench_get_values);
criterion_main!(benches);
