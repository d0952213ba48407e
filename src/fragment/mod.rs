pub(crate) mod oplog;
pub(crate) mod storage;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::cache::{new_cache, sort_pairs, Cache, Pair};
use crate::core::{AttrStore, AttrValue, CacheType, FieldOptions, SHARD_WIDTH};
use crate::error::{StorageError, ViewError, ViewResult};
use oplog::{Op, OpLog};

/// 按行属性过滤 TopN：`attrs[name]` 命中 `values` 之一的行保留
#[derive(Clone, Debug, Default)]
pub struct AttrFilter {
    pub name: String,
    pub values: Vec<AttrValue>,
}

#[derive(Clone, Debug, Default)]
pub struct TopOptions {
    /// 0 表示不截断
    pub n: usize,
    /// 非空时只在这些行里排名（不经过缓存）
    pub row_ids: Vec<u64>,
    pub filter: Option<AttrFilter>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FragmentStats {
    pub shard: u64,
    pub rows: usize,
    pub bits: u64,
    pub bitmap_bytes: u64,
    pub cache_entries: usize,
    pub pending_ops: usize,
}

#[derive(Default)]
struct FragmentState {
    open: bool,
    rows: BTreeMap<u64, RoaringBitmap>,
    ops: Option<OpLog>,
    /// 上次快照之后的变更数
    op_n: usize,
}

/// 一个 shard 在某个 view 下的物理存储单元。
///
/// 只由 View 创建（`View::create_fragment_if_not_exists`）与销毁（`View::delete_fragment`）。
///
/// 磁盘布局（`<view>/fragments/`）：
/// - `<shard>`：行 bitmap 快照
/// - `<shard>.ops`：快照之后的变更日志
/// - `<shard>.cache`：缓存中的 row id
pub struct Fragment {
    index: String,
    field: String,
    view: String,
    shard: u64,
    path: PathBuf,
    options: FieldOptions,
    row_attr_store: Arc<dyn AttrStore>,
    // 锁顺序：state → cache
    state: RwLock<FragmentState>,
    cache: Mutex<Box<dyn Cache>>,
}

impl std::fmt::Debug for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragment")
            .field("index", &self.index)
            .field("field", &self.field)
            .field("view", &self.view)
            .field("shard", &self.shard)
            .field("path", &self.path)
            .finish()
    }
}

impl Fragment {
    pub(crate) fn new(
        path: PathBuf,
        index: &str,
        field: &str,
        view: &str,
        shard: u64,
        options: FieldOptions,
        row_attr_store: Arc<dyn AttrStore>,
    ) -> Self {
        let cache = new_cache(&options);
        Self {
            index: index.to_string(),
            field: field.to_string(),
            view: view.to_string(),
            shard,
            path,
            options,
            row_attr_store,
            state: RwLock::new(FragmentState::default()),
            cache: Mutex::new(cache),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn shard(&self) -> u64 {
        self.shard
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache_path(&self) -> PathBuf {
        self.path.with_extension("cache")
    }

    pub fn ops_path(&self) -> PathBuf {
        self.path.with_extension("ops")
    }

    pub fn cache_type(&self) -> CacheType {
        self.options.effective_cache_type()
    }

    pub fn is_open(&self) -> bool {
        self.state.read().open
    }

    /// 准备磁盘结构并恢复数据：快照 → 回放 op log → 重建缓存。
    ///
    /// 失败时删除本次新建的文件，已存在的文件原样保留。
    pub(crate) fn open(&self) -> Result<(), StorageError> {
        let mut st = self.state.write();
        if st.open {
            return Ok(());
        }
        let fresh_data = !self.path.exists();
        let fresh_ops = !self.ops_path().exists();

        let res = self.open_locked(&mut st);
        if res.is_err() {
            let mut created = Vec::new();
            if fresh_ops {
                created.push(self.ops_path());
            }
            if fresh_data {
                created.push(self.path.clone());
                created.push(self.path.with_extension("tmp"));
            }
            for p in &created {
                if let Err(e) = storage::remove_if_exists(p) {
                    tracing::warn!("Fragment {} cleanup after failed open: {}", self.shard, e);
                }
            }
        }
        res
    }

    fn open_locked(&self, st: &mut FragmentState) -> Result<(), StorageError> {
        let mut rows = if self.path.exists() {
            storage::read_data_file(&self.path, self.shard)?
        } else {
            storage::write_data_file(&self.path, self.shard, &BTreeMap::new())?;
            BTreeMap::new()
        };

        let (log, replay) = OpLog::open(self.ops_path())?;
        if replay.truncated_tail > 0 {
            tracing::warn!(
                "Fragment {}/{}/{}/{}: dropped {} torn op log record(s)",
                self.index,
                self.field,
                self.view,
                self.shard,
                replay.truncated_tail
            );
        }
        for op in &replay.ops {
            apply_op(&mut rows, *op);
        }

        st.op_n = replay.ops.len();
        st.rows = rows;
        st.ops = Some(log);
        st.open = true;

        self.load_cache(&st.rows);

        tracing::debug!(
            "Fragment opened: {}/{}/{}/{} rows={} replayed_ops={}",
            self.index,
            self.field,
            self.view,
            self.shard,
            st.rows.len(),
            st.op_n
        );
        Ok(())
    }

    /// 优先按 cache 文件里的 id 恢复；没有 cache 文件时全部行参与排名。
    fn load_cache(&self, rows: &BTreeMap<u64, RoaringBitmap>) {
        let ids = match storage::read_cache_file(&self.cache_path()) {
            Ok(Some(ids)) => ids,
            Ok(None) => rows.keys().copied().collect(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache file: {}", e);
                rows.keys().copied().collect()
            }
        };

        let mut c = self.cache.lock();
        c.clear();
        for id in ids {
            if let Some(b) = rows.get(&id) {
                c.bulk_add(id, b.len());
            }
        }
        c.invalidate();
    }

    /// 刷 cache、同步 op log 并释放内存。已关闭时为 no-op。
    pub(crate) fn close(&self) -> Result<(), StorageError> {
        let mut st = self.state.write();
        if !st.open {
            return Ok(());
        }

        let flushed = self.flush_cache_inner();
        let synced = match st.ops.take() {
            Some(log) => log.sync(),
            None => Ok(()),
        };
        st.rows.clear();
        st.op_n = 0;
        st.open = false;
        self.cache.lock().clear();

        flushed.and(synced)
    }

    /// 关闭并物理删除全部文件。
    ///
    /// 先把 op log 折叠进数据文件，数据文件最后删除：
    /// 删除中途失败时磁盘上要么是完整快照，要么什么都没有。
    /// 失败时重新打开，fragment 保持可用。
    pub(crate) fn destroy(&self) -> Result<(), StorageError> {
        let mut st = self.state.write();
        let was_open = st.open;
        if st.open && st.op_n > 0 {
            self.snapshot_locked(&mut st)?;
        }

        st.ops = None;
        st.rows.clear();
        st.op_n = 0;
        st.open = false;
        self.cache.lock().clear();

        let files = [
            self.ops_path(),
            self.cache_path(),
            self.path.with_extension("tmp"),
            self.path.with_extension("cache.tmp"),
            self.path.clone(),
        ];
        for p in &files {
            if let Err(e) = storage::remove_if_exists(p) {
                if was_open {
                    if let Err(re) = self.open_locked(&mut st) {
                        tracing::warn!(
                            "Fragment {} reopen after failed delete also failed: {}",
                            self.shard,
                            re
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn pos(&self, column: u64) -> ViewResult<u32> {
        if column / SHARD_WIDTH != self.shard {
            return Err(ViewError::ColumnOutOfShard {
                column,
                shard: self.shard,
            });
        }
        Ok((column % SHARD_WIDTH) as u32)
    }

    fn ensure_open(&self, st: &FragmentState) -> ViewResult<()> {
        if st.open {
            Ok(())
        } else {
            Err(ViewError::FragmentClosed { shard: self.shard })
        }
    }

    /// 置位；返回 bit 是否发生变化
    pub fn set_bit(&self, row: u64, column: u64) -> ViewResult<bool> {
        let pos = self.pos(column)?;
        self.mutate(row, Op::Set { row, pos })
    }

    /// 清位；返回 bit 是否发生变化
    pub fn clear_bit(&self, row: u64, column: u64) -> ViewResult<bool> {
        let pos = self.pos(column)?;
        self.mutate(row, Op::Clear { row, pos })
    }

    fn mutate(&self, row: u64, op: Op) -> ViewResult<bool> {
        let mut st = self.state.write();
        self.ensure_open(&st)?;

        let present = st.rows.get(&row).is_some_and(|b| match op {
            Op::Set { pos, .. } | Op::Clear { pos, .. } => b.contains(pos),
        });
        let noop = match op {
            Op::Set { .. } => present,
            Op::Clear { .. } => !present,
        };
        if noop {
            return Ok(false);
        }

        // 先写日志后改内存
        if let Some(log) = st.ops.as_mut() {
            log.append(op)?;
        }
        apply_op(&mut st.rows, op);
        st.op_n += 1;

        let count = st.rows.get(&row).map(|b| b.len()).unwrap_or(0);
        self.cache.lock().add(row, count);

        if self.options.max_op_n > 0 && st.op_n > self.options.max_op_n {
            // op log 仍然持有这次变更，快照失败不影响写入结果
            if let Err(e) = self.snapshot_locked(&mut st) {
                tracing::warn!("Fragment {} snapshot failed: {}", self.shard, e);
            }
        }
        Ok(true)
    }

    pub fn bit(&self, row: u64, column: u64) -> ViewResult<bool> {
        let pos = self.pos(column)?;
        let st = self.state.read();
        self.ensure_open(&st)?;
        Ok(st.rows.get(&row).is_some_and(|b| b.contains(pos)))
    }

    /// 行内所有置位的绝对列号（升序）
    pub fn row(&self, row: u64) -> ViewResult<Vec<u64>> {
        let st = self.state.read();
        self.ensure_open(&st)?;
        // 超出列空间的 shard 永远没有 bit
        let Some(base) = self.shard.checked_mul(SHARD_WIDTH) else {
            return Ok(Vec::new());
        };
        Ok(st
            .rows
            .get(&row)
            .map(|b| b.iter().map(|p| base + p as u64).collect())
            .unwrap_or_default())
    }

    pub fn row_count(&self, row: u64) -> ViewResult<u64> {
        let st = self.state.read();
        self.ensure_open(&st)?;
        Ok(st.rows.get(&row).map(|b| b.len()).unwrap_or(0))
    }

    pub fn row_ids(&self) -> ViewResult<Vec<u64>> {
        let st = self.state.read();
        self.ensure_open(&st)?;
        Ok(st.rows.keys().copied().collect())
    }

    /// 本 shard 内的 TopN（按 count 降序，同 count 按 id 升序）。
    ///
    /// `none` 缓存下直接从 bitmap 计算。
    pub fn top(&self, opts: &TopOptions) -> ViewResult<Vec<Pair>> {
        let mut pairs = {
            let st = self.state.read();
            self.ensure_open(&st)?;

            let mut cache = self.cache.lock();
            if !opts.row_ids.is_empty() || cache.is_pass_through() {
                let mut pairs: Vec<Pair> = if opts.row_ids.is_empty() {
                    st.rows
                        .iter()
                        .map(|(id, b)| Pair {
                            id: *id,
                            count: b.len(),
                        })
                        .collect()
                } else {
                    opts.row_ids
                        .iter()
                        .filter_map(|id| {
                            st.rows.get(id).map(|b| Pair {
                                id: *id,
                                count: b.len(),
                            })
                        })
                        .collect()
                };
                pairs.retain(|p| p.count > 0);
                sort_pairs(&mut pairs);
                pairs.dedup_by_key(|p| p.id);
                pairs
            } else {
                cache.top()
            }
        };

        if let Some(filter) = &opts.filter {
            let mut kept = Vec::with_capacity(pairs.len());
            for p in pairs {
                if opts.n > 0 && kept.len() >= opts.n {
                    break;
                }
                let Some(attrs) = self.row_attr_store.attrs(p.id)? else {
                    continue;
                };
                if attrs
                    .get(&filter.name)
                    .is_some_and(|v| filter.values.contains(v))
                {
                    kept.push(p);
                }
            }
            pairs = kept;
        }

        if opts.n > 0 {
            pairs.truncate(opts.n);
        }
        Ok(pairs)
    }

    /// 把 op log 折叠进数据文件
    pub fn snapshot(&self) -> ViewResult<()> {
        let mut st = self.state.write();
        self.ensure_open(&st)?;
        self.snapshot_locked(&mut st)?;
        Ok(())
    }

    fn snapshot_locked(&self, st: &mut FragmentState) -> Result<(), StorageError> {
        let bytes = storage::write_data_file(&self.path, self.shard, &st.rows)?;
        if let Some(log) = st.ops.as_mut() {
            log.reset()?;
        }
        tracing::debug!(
            "Fragment snapshot written: shard={} rows={} ops_folded={} bytes={}",
            self.shard,
            st.rows.len(),
            st.op_n,
            bytes
        );
        st.op_n = 0;
        Ok(())
    }

    pub fn flush_cache(&self) -> ViewResult<()> {
        let st = self.state.read();
        self.ensure_open(&st)?;
        self.flush_cache_inner()?;
        Ok(())
    }

    fn flush_cache_inner(&self) -> Result<(), StorageError> {
        let ids = {
            let c = self.cache.lock();
            if c.is_pass_through() {
                return Ok(());
            }
            c.ids()
        };
        storage::write_cache_file(&self.cache_path(), &ids)
    }

    pub fn recalculate_cache(&self) {
        self.cache.lock().recalculate();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn stats(&self) -> FragmentStats {
        let st = self.state.read();
        let cache_entries = self.cache.lock().len();
        FragmentStats {
            shard: self.shard,
            rows: st.rows.len(),
            bits: st.rows.values().map(|b| b.len()).sum(),
            bitmap_bytes: st.rows.values().map(|b| b.serialized_size() as u64).sum(),
            cache_entries,
            pending_ops: st.op_n,
        }
    }
}

fn apply_op(rows: &mut BTreeMap<u64, RoaringBitmap>, op: Op) {
    match op {
        Op::Set { row, pos } => {
            rows.entry(row).or_default().insert(pos);
        }
        Op::Clear { row, pos } => {
            if let Some(b) = rows.get_mut(&row) {
                b.remove(pos);
                if b.is_empty() {
                    rows.remove(&row);
                }
            }
        }
    }
}
