//! Exploration benchmarks.
//!
//! Measures the end-to-end cost of one exhaustive exploration and of a
//! fixed random budget on the lost-update workload:
//!
//! - systematic DPOR, unbounded and preemption-bounded
//! - uniform random with a fixed budget
//! - snapshot replay vs full replay per execution
//!
//! Run: `cargo bench --bench exploration`

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use weft::program::{fork, read_ref, stop, write_ref, Program};
use weft::{run_sct_strict, sct_uniform_random, Bounds, MemType, Way};

fn lost_update() -> Program {
    Program::with_setup(
        |setup| setup.new_ref(0),
        |&r| {
            let incr = |r| read_ref(r, move |v| write_ref(r, v + 1, stop(0)));
            fork(incr(r), move |_| {
                fork(incr(r), move |_| read_ref(r, stop))
            })
        },
    )
}

fn lost_update_without_setup() -> Program {
    Program::new(|| {
        weft::program::new_ref(0, |r| {
            let incr = |r| read_ref(r, move |v| write_ref(r, v + 1, stop(0)));
            fork(incr(r), move |_| {
                fork(incr(r), move |_| read_ref(r, stop))
            })
        })
    })
}

fn bench_systematic(c: &mut Criterion) {
    let mut group = c.benchmark_group("systematic");
    group.bench_function("unbounded", |b| {
        b.iter(|| {
            black_box(run_sct_strict(
                Way::systematic(Bounds::NONE),
                MemType::SequentialConsistency,
                lost_update(),
            ))
        });
    });
    group.bench_function("preemption_bound_2", |b| {
        let bounds = Bounds {
            preemption: Some(2),
            ..Bounds::NONE
        };
        b.iter(|| {
            black_box(run_sct_strict(
                Way::systematic(bounds),
                MemType::SequentialConsistency,
                lost_update(),
            ))
        });
    });
    group.bench_function("tso_unbounded", |b| {
        b.iter(|| {
            black_box(run_sct_strict(
                Way::systematic(Bounds::NONE),
                MemType::TotalStoreOrder,
                lost_update(),
            ))
        });
    });
    group.finish();
}

fn bench_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("random");
    group.bench_function("uniform_100", |b| {
        b.iter(|| {
            black_box(
                sct_uniform_random(MemType::SequentialConsistency, 42, 100, lost_update())
                    .count(),
            )
        });
    });
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    group.bench_function("with_setup_prefix", |b| {
        b.iter(|| {
            black_box(
                sct_uniform_random(MemType::SequentialConsistency, 42, 50, lost_update())
                    .count(),
            )
        });
    });
    group.bench_function("full_replay", |b| {
        b.iter(|| {
            black_box(
                sct_uniform_random(
                    MemType::SequentialConsistency,
                    42,
                    50,
                    lost_update_without_setup(),
                )
                .count(),
            )
        });
    });
    group.finish();
}

criterion_group!(benches, bench_systematic, bench_random, bench_snapshot);
criterion_main!(benches);
