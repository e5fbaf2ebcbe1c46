//! Compares the two RCU flavors' reader fast paths, the way
//! `droundy-rcu-clean`'s `benches/bench.rs` compares smart-pointer
//! flavors against each other: one `criterion` group per flavor, same
//! workload shape, read off the relative cost directly from the report.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use concurrent_reclaim::rcu::percpu_flavor::RcuDomain as PerCpuDomain;
use concurrent_reclaim::rcu::qsbr::RcuDomain as QsbrDomain;

fn percpu_read_lock_unlock(c: &mut Criterion) {
    let domain = PerCpuDomain::new();
    domain.register_thread();
    c.bench_function("percpu_flavor read_lock/read_unlock", |b| {
        b.iter(|| {
            let _guard = domain.read_lock();
        });
    });
    domain.unregister_thread();
}

fn qsbr_quiescent_state(c: &mut Criterion) {
    let domain = QsbrDomain::new();
    domain.register_thread();
    c.bench_function("qsbr quiescent_state", |b| {
        b.iter(|| {
            domain.quiescent_state();
        });
    });
    domain.unregister_thread();
}

fn percpu_synchronize_no_readers(c: &mut Criterion) {
    c.bench_function("percpu_flavor synchronize (no readers)", |b| {
        b.iter_batched(
            PerCpuDomain::new,
            |domain| domain.synchronize(),
            BatchSize::SmallInput,
        );
    });
}

fn qsbr_synchronize_no_readers(c: &mut Criterion) {
    c.bench_function("qsbr synchronize (no readers)", |b| {
        b.iter_batched(QsbrDomain::new, |domain| domain.synchronize(), BatchSize::SmallInput);
    });
}

criterion_group!(
    benches,
    percpu_read_lock_unlock,
    qsbr_quiescent_state,
    percpu_synchronize_no_readers,
    qsbr_synchronize_no_readers
);
criterion_main!(benches);
