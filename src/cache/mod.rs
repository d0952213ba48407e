pub mod lru;
pub mod ranked;

use serde::{Deserialize, Serialize};

use crate::core::{CacheType, FieldOptions};

pub use lru::LruCache;
pub use ranked::RankCache;

/// (row id, bit 数)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub id: u64,
    pub count: u64,
}

/// Fragment 内部的行缓存。
///
/// ## 契约
/// - `len()` 永远不超过构造时给定的容量。
/// - `top()` 按 count 降序、同 count 按 id 升序返回。
/// - `add(id, 0)` 等价于移除该行。
pub trait Cache: Send + Sync {
    fn add(&mut self, id: u64, count: u64);

    /// 批量写入，rankings 延迟到下一次 `top()` / `recalculate()`
    fn bulk_add(&mut self, id: u64, count: u64);

    fn get(&mut self, id: u64) -> u64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids(&self) -> Vec<u64>;

    fn top(&mut self) -> Vec<Pair>;

    /// 标记 rankings 过期
    fn invalidate(&mut self);

    /// 立即重建 rankings
    fn recalculate(&mut self);

    fn clear(&mut self);

    /// 透传缓存（`none`）不维护任何排名
    fn is_pass_through(&self) -> bool {
        false
    }
}

/// 按 field 配置构造缓存：同一 field 下所有 fragment 使用同一策略与容量。
pub fn new_cache(opts: &FieldOptions) -> Box<dyn Cache> {
    let size = opts.cache_size as usize;
    match opts.effective_cache_type() {
        CacheType::Ranked => Box::new(RankCache::new(size)),
        CacheType::Lru => Box::new(LruCache::new(size)),
        CacheType::None => Box::new(NopCache),
    }
}

pub(crate) fn sort_pairs(pairs: &mut [Pair]) {
    pairs.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
}

/// `none`：所有写入被忽略
#[derive(Clone, Copy, Debug, Default)]
pub struct NopCache;

impl Cache for NopCache {
    fn add(&mut self, _id: u64, _count: u64) {}

    fn bulk_add(&mut self, _id: u64, _count: u64) {}

    fn get(&mut self, _id: u64) -> u64 {
        0
    }

    fn len(&self) -> usize {
        0
    }

    fn ids(&self) -> Vec<u64> {
        Vec::new()
    }

    fn top(&mut self) -> Vec<Pair> {
        Vec::new()
    }

    fn invalidate(&mut self) {}

    fn recalculate(&mut self) {}

    fn clear(&mut self) {}

    fn is_pass_through(&self) -> bool {
        true
    }
}
