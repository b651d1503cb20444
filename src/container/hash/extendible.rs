use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::sync::Arc;
use parking_lot::RwLock;

/// A bucket holding up to `bucket_size` key-value pairs at a given local
/// depth.
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(depth: usize, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }
}

struct Directory<K, V> {
    global_depth: usize,
    slots: Vec<Arc<RwLock<Bucket<K, V>>>>,
    num_buckets: usize,
}

/// Directory-based extendible hash table.
///
/// The directory holds `2^global_depth` slots; each bucket carries a local
/// depth no greater than the global depth, and every slot whose index shares
/// the bucket's low `local_depth` bits points at that bucket. Overflowing a
/// bucket whose local depth equals the global depth doubles the directory
/// (new slots mirror the old half) before the bucket splits.
///
/// Used as the buffer pool's page table and reusable as a general map.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    bucket_size: usize,
    hasher: S,
    dir: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        let dir = Directory {
            global_depth: 0,
            slots: vec![Arc::new(RwLock::new(Bucket::new(0, bucket_size)))],
            num_buckets: 1,
        };
        Self {
            bucket_size,
            hasher,
            dir: RwLock::new(dir),
        }
    }

    fn hash(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        (self.hash(key) & ((1u64 << global_depth) - 1)) as usize
    }

    /// Look up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.read();
        let bucket = dir.slots[self.index_of(key, dir.global_depth)].read();
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.read();
        let mut bucket = dir.slots[self.index_of(key, dir.global_depth)].write();
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the value under `key`.
    ///
    /// Splitting can leave every rehashed item in the same half, so the
    /// insert retries until the target bucket has room.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.dir.write();
        loop {
            let idx = self.index_of(&key, dir.global_depth);
            let slot = dir.slots[idx].clone();
            {
                let mut bucket = slot.write();
                if let Some(item) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                    item.1 = value;
                    return;
                }
                if bucket.items.len() < self.bucket_size {
                    bucket.items.push((key, value));
                    return;
                }
            }

            if slot.read().depth == dir.global_depth {
                self.grow_directory(&mut dir);
            }
            let split_idx = self.index_of(&key, dir.global_depth);
            self.split_bucket(&mut dir, split_idx);
        }
    }

    /// Double the directory; each new slot mirrors the slot it shadows.
    fn grow_directory(&self, dir: &mut Directory<K, V>) {
        let old_size = dir.slots.len();
        dir.slots.reserve(old_size);
        for i in 0..old_size {
            let mirror = dir.slots[i].clone();
            dir.slots.push(mirror);
        }
        dir.global_depth += 1;
    }

    /// Split the bucket behind directory slot `idx`, re-pointing every slot
    /// that shared it by the bit at the old local depth and rehashing its
    /// items into the two halves.
    fn split_bucket(&self, dir: &mut Directory<K, V>, idx: usize) {
        let old_slot = dir.slots[idx].clone();
        let mut old_bucket = old_slot.write();
        let old_depth = old_bucket.depth;
        debug_assert!(old_depth < dir.global_depth);

        let mut new_bucket = Bucket::new(old_depth + 1, self.bucket_size);
        old_bucket.depth = old_depth + 1;

        let items = std::mem::take(&mut old_bucket.items);
        for (k, v) in items {
            if (self.hash(&k) >> old_depth) & 1 == 1 {
                new_bucket.items.push((k, v));
            } else {
                old_bucket.items.push((k, v));
            }
        }
        drop(old_bucket);

        let new_slot = Arc::new(RwLock::new(new_bucket));
        let low_bits = idx & ((1 << old_depth) - 1);
        for i in 0..dir.slots.len() {
            if i & ((1 << old_depth) - 1) == low_bits && (i >> old_depth) & 1 == 1 {
                dir.slots[i] = new_slot.clone();
            }
        }
        dir.num_buckets += 1;
    }

    pub fn global_depth(&self) -> usize {
        self.dir.read().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.dir.read().slots[dir_index].read().depth
    }

    pub fn num_buckets(&self) -> usize {
        self.dir.read().num_buckets
    }
}
