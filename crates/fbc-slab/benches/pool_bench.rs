use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fbc_slab::SlabPool;

fn alloc_free_cycle(c: &mut Criterion) {
    let pool = SlabPool::new(32, 256, "bench").unwrap();
    c.bench_function("slab alloc/free cycle", |b| {
        b.iter(|| {
            let ptr = pool.alloc();
            pool.free(black_box(ptr));
        })
    });
}

fn alloc_burst(c: &mut Criterion) {
    let pool = SlabPool::new(32, 256, "bench_burst").unwrap();
    c.bench_function("slab alloc burst of 128", |b| {
        b.iter(|| {
            let mut held = Vec::with_capacity(128);
            for _ in 0..128 {
                held.push(pool.alloc());
            }
            for ptr in held {
                pool.free(black_box(ptr));
            }
        })
    });
}

criterion_group!(benches, alloc_free_cycle, alloc_burst);
criterion_main!(benches);
