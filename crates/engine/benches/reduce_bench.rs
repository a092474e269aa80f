//! Reduce algorithm benchmarks.
//!
//! Measures the three tree reducers against each other and the compaction
//! ratio they achieve over random workloads of varying size and key
//! cardinality.

#![allow(clippy::expect_used, missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use minlog_engine::{AvlTreeHt, Command, Op, Reducer, Structure};

struct Scenario {
    commands: u64,
    write_percent: u32,
    distinct_keys: u32,
    p: u64,
    n: u64,
}

const SCENARIOS: [Scenario; 3] = [
    Scenario {
        commands: 1_000,
        write_percent: 50,
        distinct_keys: 100,
        p: 0,
        n: 1_000,
    },
    Scenario {
        commands: 10_000,
        write_percent: 50,
        distinct_keys: 1_000,
        p: 0,
        n: 10_000,
    },
    Scenario {
        commands: 100_000,
        write_percent: 50,
        distinct_keys: 10_000,
        p: 5_000,
        n: 12_000,
    },
];

fn build_tree(sc: &Scenario) -> AvlTreeHt {
    let mut rng = StdRng::seed_from_u64(0x517E);
    let avl = AvlTreeHt::new();
    for id in 0..sc.commands {
        let key = rng.gen_range(0..sc.distinct_keys).to_string();
        let cmd = if rng.gen_range(0..100) < sc.write_percent {
            Command {
                id,
                op: Op::Set,
                key,
                value: rng.gen::<u32>().to_string(),
            }
        } else {
            Command {
                id,
                op: Op::Get,
                key,
                value: String::new(),
            }
        };
        avl.log(cmd).expect("log");
    }
    avl
}

fn bench_tree_reducers(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_reducers");

    for sc in &SCENARIOS {
        let avl = build_tree(sc);
        group.throughput(Throughput::Elements(sc.n - sc.p));

        for (name, alg) in [
            ("greedy", Reducer::GreedyAvl),
            ("iter_bfs", Reducer::IterBfsAvl),
            ("iter_dfs", Reducer::IterDfsAvl),
        ] {
            group.bench_with_input(
                BenchmarkId::new(name, sc.commands),
                &alg,
                |b, &alg| {
                    b.iter(|| {
                        let out = avl.reduce_with(alg, sc.p, sc.n).expect("reduce");
                        black_box(out)
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_tree_reducers);
criterion_main!(benches);
