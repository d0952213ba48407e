use std::collections::HashMap;

use super::{sort_pairs, Cache, Pair};

/// 按 bit 数排名的有界缓存（TopN 的候选集）。
///
/// 满时新行只有在 count 严格大于当前最低排名时才会挤掉它；
/// 最低排名 = count 最小，同 count 时 id 最大。
pub struct RankCache {
    max_entries: usize,
    entries: HashMap<u64, u64>,
    rankings: Vec<Pair>,
    dirty: bool,
    /// 当前最低排名；None 表示需要重新扫描
    threshold: Option<Pair>,
}

/// a 的排名是否低于 b
fn ranks_below(a: Pair, b: Pair) -> bool {
    a.count < b.count || (a.count == b.count && a.id > b.id)
}

impl RankCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: HashMap::with_capacity(max_entries.min(1 << 16)),
            rankings: Vec::new(),
            dirty: false,
            threshold: None,
        }
    }

    fn scan_lowest(&self) -> Option<Pair> {
        self.entries
            .iter()
            .map(|(id, count)| Pair {
                id: *id,
                count: *count,
            })
            .reduce(|low, p| if ranks_below(p, low) { p } else { low })
    }

    /// 满时才需要；只有最低项被淘汰或改变后才重新扫描
    fn lowest(&mut self) -> Option<Pair> {
        if self.threshold.is_none() {
            self.threshold = self.scan_lowest();
        }
        self.threshold
    }

    /// 记录一次写入对 threshold 的影响
    fn note_upsert(&mut self, p: Pair) {
        if let Some(t) = self.threshold {
            if t.id == p.id {
                // 最低项的 count 变了，可能不再最低
                self.threshold = None;
            } else if ranks_below(p, t) {
                self.threshold = Some(p);
            }
        }
    }

    fn insert(&mut self, id: u64, count: u64) {
        if count == 0 {
            if self.entries.remove(&id).is_some() {
                self.dirty = true;
                if self.threshold.is_some_and(|t| t.id == id) {
                    self.threshold = None;
                }
            }
            return;
        }
        if self.max_entries == 0 {
            return;
        }

        let p = Pair { id, count };
        if self.entries.contains_key(&id) || self.entries.len() < self.max_entries {
            self.entries.insert(id, count);
            self.dirty = true;
            self.note_upsert(p);
            return;
        }

        // 满：与最低排名比较，决定淘汰谁
        let Some(low) = self.lowest() else {
            return;
        };
        if ranks_below(low, p) {
            self.entries.remove(&low.id);
            self.entries.insert(id, count);
            self.dirty = true;
            self.threshold = None;
        }
    }
}

impl Cache for RankCache {
    fn add(&mut self, id: u64, count: u64) {
        self.insert(id, count);
    }

    fn bulk_add(&mut self, id: u64, count: u64) {
        self.insert(id, count);
    }

    fn get(&mut self, id: u64) -> u64 {
        self.entries.get(&id).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn top(&mut self) -> Vec<Pair> {
        if self.dirty {
            self.recalculate();
        }
        self.rankings.clone()
    }

    fn invalidate(&mut self) {
        self.dirty = true;
    }

    fn recalculate(&mut self) {
        let mut rankings: Vec<Pair> = self
            .entries
            .iter()
            .map(|(id, count)| Pair {
                id: *id,
                count: *count,
            })
            .collect();
        sort_pairs(&mut rankings);
        self.rankings = rankings;
        self.dirty = false;
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.rankings.clear();
        self.dirty = false;
        self.threshold = None;
    }
}
