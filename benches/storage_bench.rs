use std::sync::Arc;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::NamedTempFile;

use basaltdb::index::btree::BPlusTree;
use basaltdb::storage::buffer::BufferPoolManager;

fn bench_buffer_pool(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, 2, file.path()).unwrap());

    let mut page_ids = Vec::new();
    for _ in 0..128 {
        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();
        page_ids.push(page_id);
    }

    c.bench_function("buffer_pool_fetch_unpin_resident", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let page_id = page_ids[i % page_ids.len()];
            i += 1;
            let _page = pool.fetch_page(page_id).unwrap();
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

fn bench_btree_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1k", |b| {
        b.iter_batched(
            || {
                let file = NamedTempFile::new().unwrap();
                let pool = Arc::new(BufferPoolManager::new(256, 2, file.path()).unwrap());
                let tree: BPlusTree<i64> = BPlusTree::new("bench", pool, 64, 64).unwrap();
                (file, tree)
            },
            |(_file, tree)| {
                for key in 0..1000i64 {
                    tree.insert(&key, key as u32).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_btree_lookup(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, 2, file.path()).unwrap());
    let tree: BPlusTree<i64> = BPlusTree::new("bench", pool, 64, 64).unwrap();
    for key in 0..10_000i64 {
        tree.insert(&key, key as u32).unwrap();
    }

    c.bench_function("btree_point_lookup", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = (key + 7919) % 10_000;
            tree.get_value(&key).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_buffer_pool,
    bench_btree_insert,
    bench_btree_lookup
);
criterion_main!(benches);
