use std::collections::HashMap;

use super::{sort_pairs, Cache, Pair};

/// LRU 缓存：满时淘汰最久未被 add/get 触达的行
pub struct LruCache {
    pub capacity: usize,
    inner: HashMap<u64, u64>,
    access_count: HashMap<u64, u64>, // LRU辅助：最后一次访问的逻辑时钟
    clock: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: HashMap::with_capacity(capacity.min(1 << 16)),
            access_count: HashMap::with_capacity(capacity.min(1 << 16)),
            clock: 0,
        }
    }

    fn touch(&mut self, id: u64) {
        self.clock += 1;
        self.access_count.insert(id, self.clock);
    }

    fn insert(&mut self, id: u64, count: u64) {
        if count == 0 {
            self.inner.remove(&id);
            self.access_count.remove(&id);
            return;
        }
        if self.capacity == 0 {
            return;
        }

        if !self.inner.contains_key(&id) && self.inner.len() >= self.capacity {
            // LRU淘汰
            let lru_key = self
                .access_count
                .iter()
                .min_by_key(|(_, tick)| **tick)
                .map(|(k, _)| *k);

            if let Some(key) = lru_key {
                self.inner.remove(&key);
                self.access_count.remove(&key);
            }
        }

        self.inner.insert(id, count);
        self.touch(id);
    }
}

impl Cache for LruCache {
    fn add(&mut self, id: u64, count: u64) {
        self.insert(id, count);
    }

    fn bulk_add(&mut self, id: u64, count: u64) {
        self.insert(id, count);
    }

    fn get(&mut self, id: u64) -> u64 {
        match self.inner.get(&id).copied() {
            Some(c) => {
                self.touch(id);
                c
            }
            None => 0,
        }
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn top(&mut self) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = self
            .inner
            .iter()
            .map(|(id, count)| Pair {
                id: *id,
                count: *count,
            })
            .collect();
        sort_pairs(&mut pairs);
        pairs
    }

    fn invalidate(&mut self) {}

    fn recalculate(&mut self) {}

    fn clear(&mut self) {
        self.inner.clear();
        self.access_count.clear();
        self.clock = 0;
    }
}
