//! Benchmarks for the thread-affinity layer and pool checkout.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mesa_pool::{SqliteConfig, SqlitePool, ThreadBoundProviderFactory};

/// Create a file-backed pool in a temp dir.
fn setup_pool() -> (Arc<SqlitePool>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = SqliteConfig::file(temp_dir.path().join("bench.db")).wal_mode(false);
    let pool = Arc::new(SqlitePool::new(config).unwrap());
    (pool, temp_dir)
}

fn bench_factory_get(c: &mut Criterion) {
    let (pool, _dir) = setup_pool();
    let factory = ThreadBoundProviderFactory::new(pool);

    // Warm the calling thread's cache entry; the steady state is a pure
    // cache hit.
    factory.get();

    c.bench_function("factory_get_cached", |b| {
        b.iter(|| black_box(factory.get().id()))
    });
}

fn bench_pool_checkout(c: &mut Criterion) {
    let (pool, _dir) = setup_pool();

    c.bench_function("pool_checkout_reuse", |b| {
        b.iter(|| {
            let conn = pool.get().unwrap();
            black_box(&conn);
        })
    });
}

fn bench_shared_pinning(c: &mut Criterion) {
    let (pool, _dir) = setup_pool();
    let factory = ThreadBoundProviderFactory::new(pool);

    c.bench_function("proxy_begin_end_shared", |b| {
        b.iter(|| {
            let proxy = factory.get();
            let conn = proxy.begin_shared().unwrap();
            black_box(&conn);
            proxy.end_shared();
        })
    });
}

criterion_group!(
    benches,
    bench_factory_get,
    bench_pool_checkout,
    bench_shared_pinning
);
criterion_main!(benches);
