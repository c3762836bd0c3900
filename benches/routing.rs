use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tiermem::{Tier, ThresholdConfig, TieredAllocator};

fn bench_allocate_release(c: &mut Criterion) {
    let router =
        TieredAllocator::with_heap_backends(ThresholdConfig::static_threshold(256)).unwrap();

    let mut group = c.benchmark_group("allocate_release");
    for size in [16usize, 128, 512, 4096] {
        group.bench_function(format!("{size}b"), |b| {
            b.iter(|| {
                let ptr = router.allocate(black_box(size)).unwrap();
                unsafe { router.release(ptr) };
            })
        });
    }
    group.finish();
}

fn bench_threshold_read(c: &mut Criterion) {
    let router = TieredAllocator::with_heap_backends(ThresholdConfig::ratio_target(
        256,
        16,
        1 << 20,
        1.0,
        10,
    ))
    .unwrap();

    c.bench_function("threshold_load", |b| b.iter(|| black_box(router.threshold())));
}

fn bench_controller_tick(c: &mut Criterion) {
    let router = TieredAllocator::with_heap_backends(ThresholdConfig::ratio_target(
        256,
        16,
        1 << 20,
        1.0,
        1,
    ))
    .unwrap();

    // Seed an off-target workload so every tick runs a full cycle.
    let a = router.allocate(8192).unwrap();
    let b_ = router.allocate(16).unwrap();

    c.bench_function("controller_tick", |b| b.iter(|| router.tick()));

    unsafe {
        router.release(a);
        router.release(b_);
    }

    let _ = router.used_memory(Tier::Fast);
}

criterion_group!(
    benches,
    bench_allocate_release,
    bench_threshold_read,
    bench_controller_tick
);
criterion_main!(benches);
