use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::core::{
    shard_of, AttrStore, Broadcaster, CreateShardMessage, FieldOptions, MemAttrStore, Message,
    NopBroadcaster,
};
use crate::error::{StorageError, ViewError, ViewResult};
use crate::fragment::Fragment;
use crate::stats::ViewReport;

/// 超过该时长的创建广播记 debug 日志
const SLOW_BROADCAST: Duration = Duration::from_millis(50);

type FragmentMap = HashMap<u64, Arc<Fragment>>;

/// 某个 index/field 下一个具名 view 的全部 fragment。
///
/// ## 并发模型
/// - `fragments`：ArcSwap 快照，查找无锁，从不等待创建/删除。
/// - `shard_gates`：每个 shard 一把互斥锁，创建与删除共用；
///   同一 shard 的 check-then-create 在锁内完成，不同 shard 互不等待。
/// - 新 fragment 在广播确认之后才发布进 `fragments`，
///   任何调用方拿到的 fragment 都已通知过集群。
/// - `lifecycle`：创建/删除持读锁，open/close 持写锁；
///   close 返回后不会再有进行中的创建把 fragment 发布进来。
///   锁顺序：shard gate → lifecycle。
pub struct View {
    path: PathBuf,
    index: String,
    field: String,
    name: String,
    options: FieldOptions,

    fragments: ArcSwap<FragmentMap>,
    shard_gates: DashMap<u64, Arc<Mutex<()>>>,
    lifecycle: RwLock<()>,
    opened: AtomicBool,

    row_attr_store: Arc<dyn AttrStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("path", &self.path)
            .field("index", &self.index)
            .field("field", &self.field)
            .field("name", &self.name)
            .field("fragments", &self.fragments.load().len())
            .finish()
    }
}

impl View {
    /// 只记录配置，不做 I/O。协作者默认为 `NopBroadcaster` 与空的 `MemAttrStore`。
    pub fn new(
        path: impl Into<PathBuf>,
        index: &str,
        field: &str,
        name: &str,
        options: FieldOptions,
    ) -> Self {
        Self {
            path: path.into(),
            index: index.to_string(),
            field: field.to_string(),
            name: name.to_string(),
            options,
            fragments: ArcSwap::from_pointee(HashMap::new()),
            shard_gates: DashMap::new(),
            lifecycle: RwLock::new(()),
            opened: AtomicBool::new(false),
            row_attr_store: Arc::new(MemAttrStore::new()),
            broadcaster: Arc::new(NopBroadcaster),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// 必须在 open 之前设置：已恢复的 fragment 持有的是旧引用
    pub fn with_row_attr_store(mut self, store: Arc<dyn AttrStore>) -> Self {
        self.row_attr_store = store;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn row_attr_store(&self) -> &Arc<dyn AttrStore> {
        &self.row_attr_store
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn fragments_dir(&self) -> PathBuf {
        self.path.join("fragments")
    }

    pub fn fragment_path(&self, shard: u64) -> PathBuf {
        self.fragments_dir().join(shard.to_string())
    }

    fn new_fragment(&self, shard: u64) -> Fragment {
        Fragment::new(
            self.fragment_path(shard),
            &self.index,
            &self.field,
            &self.name,
            shard,
            self.options.clone(),
            self.row_attr_store.clone(),
        )
    }

    /// 准备目录并恢复已持久化的 fragment（并行打开）。
    /// 任一 fragment 失败时，已打开的会被关闭，view 保持未打开状态。
    pub fn open(&self) -> ViewResult<()> {
        let _life = self.lifecycle.write();
        let dir = self.fragments_dir();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io("create dir", &dir, e))?;

        let mut shards = Vec::new();
        let rd = std::fs::read_dir(&dir).map_err(|e| StorageError::io("read dir", &dir, e))?;
        for ent in rd {
            let ent = ent.map_err(|e| StorageError::io("read dir", &dir, e))?;
            if !ent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            // 只认纯数字文件名；.ops/.cache/.tmp 等附属文件跳过
            if let Some(shard) = parse_shard(&ent.path()) {
                shards.push(shard);
            }
        }

        let opened: Vec<Result<Arc<Fragment>, StorageError>> = shards
            .par_iter()
            .map(|&shard| {
                let frag = Arc::new(self.new_fragment(shard));
                frag.open().map(|_| frag)
            })
            .collect();

        let mut map = FragmentMap::with_capacity(opened.len());
        let mut first_err = None;
        for r in opened {
            match r {
                Ok(f) => {
                    map.insert(f.shard(), f);
                }
                Err(e) => {
                    tracing::warn!(
                        "View {}/{}/{}: fragment open failed: {}",
                        self.index,
                        self.field,
                        self.name,
                        e
                    );
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            for f in map.values() {
                if let Err(ce) = f.close() {
                    tracing::warn!("Fragment {} close failed: {}", f.shard(), ce);
                }
            }
            return Err(e.into());
        }

        tracing::info!(
            "View opened: {}/{}/{} at {:?} ({} fragments)",
            self.index,
            self.field,
            self.name,
            self.path,
            map.len()
        );
        self.fragments.store(Arc::new(map));
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    /// 关闭全部 fragment 并清空映射。未打开过的 view 为 no-op。
    /// 所有 fragment 都会尝试关闭，返回第一个错误。
    pub fn close(&self) -> ViewResult<()> {
        // 等待进行中的创建/删除结束
        let _life = self.lifecycle.write();
        if !self.opened.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let old = self.fragments.swap(Arc::new(HashMap::new()));

        let mut first_err = None;
        for f in old.values() {
            if let Err(e) = f.close() {
                tracing::warn!("Fragment {} close failed: {}", f.shard(), e);
                first_err.get_or_insert(e);
            }
        }
        tracing::info!(
            "View closed: {}/{}/{} ({} fragments)",
            self.index,
            self.field,
            self.name,
            old.len()
        );
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// 纯读取，不加锁、不触发创建
    pub fn fragment(&self, shard: u64) -> Option<Arc<Fragment>> {
        self.fragments.load().get(&shard).cloned()
    }

    pub fn all_fragments(&self) -> Vec<Arc<Fragment>> {
        let mut v: Vec<Arc<Fragment>> = self.fragments.load().values().cloned().collect();
        v.sort_by_key(|f| f.shard());
        v
    }

    /// 当前存在 fragment 的 shard（升序）
    pub fn shards(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.fragments.load().keys().copied().collect();
        v.sort_unstable();
        v
    }

    fn shard_gate(&self, shard: u64) -> Arc<Mutex<()>> {
        // gate 不回收：回收后等待者与新来者可能各持一把锁
        self.shard_gates
            .entry(shard)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn publish(&self, shard: u64, frag: Arc<Fragment>) {
        self.fragments.rcu(|cur| {
            let mut next = FragmentMap::clone(cur);
            next.insert(shard, frag.clone());
            next
        });
    }

    fn unpublish(&self, shard: u64) {
        self.fragments.rcu(|cur| {
            let mut next = FragmentMap::clone(cur);
            next.remove(&shard);
            next
        });
    }

    /// 返回 shard 的 fragment，不存在时创建。
    ///
    /// 同一 shard 的并发调用只有一个执行 构造 → 打开 → 广播 → 发布，
    /// 其余阻塞在 shard gate 上，醒来后拿到同一个实例；广播恰好一次。
    /// 失败（存储或广播）时不发布任何东西，重试从干净状态开始。
    pub fn create_fragment_if_not_exists(&self, shard: u64) -> ViewResult<Arc<Fragment>> {
        if let Some(f) = self.fragment(shard) {
            return Ok(f);
        }

        let gate = self.shard_gate(shard);
        let _g = gate.lock();

        // 等待者在这里看到首个调用方发布的结果
        if let Some(f) = self.fragment(shard) {
            return Ok(f);
        }
        let _life = self.lifecycle.read();
        if !self.is_open() {
            return Err(ViewError::NotOpen);
        }

        let frag = Arc::new(self.new_fragment(shard));
        frag.open()?;

        if let Err(e) = self.broadcast_create(shard) {
            // 完全回滚：集群没确认的 fragment 不留磁盘残留
            if let Err(de) = frag.destroy() {
                tracing::warn!("Rollback of shard {} after broadcast failure: {}", shard, de);
            }
            return Err(e);
        }

        self.publish(shard, frag.clone());
        tracing::debug!(
            "Fragment created: {}/{}/{}/{}",
            self.index,
            self.field,
            self.name,
            shard
        );
        Ok(frag)
    }

    fn broadcast_create(&self, shard: u64) -> ViewResult<()> {
        let msg = Message::CreateShard(CreateShardMessage {
            index: self.index.clone(),
            field: self.field.clone(),
            view: self.name.clone(),
            shard,
        });

        let started = Instant::now();
        let res = self.broadcaster.send_sync(&msg);
        let elapsed = started.elapsed();
        if elapsed > SLOW_BROADCAST {
            tracing::debug!("broadcasting create shard {} took {:?}", shard, elapsed);
        }
        res.map_err(|source| ViewError::Broadcast { shard, source })
    }

    /// 删除 shard 的 fragment 及其磁盘数据。
    ///
    /// - 不存在：`ViewError::NotFound`（良性）。
    /// - 磁盘删除失败：`ViewError::Storage`，fragment 重新发布，调用方可重试。
    pub fn delete_fragment(&self, shard: u64) -> ViewResult<()> {
        let gate = self.shard_gate(shard);
        let _g = gate.lock();
        let _life = self.lifecycle.read();

        let Some(frag) = self.fragment(shard) else {
            return Err(ViewError::NotFound { shard });
        };

        self.unpublish(shard);
        if let Err(e) = frag.destroy() {
            self.publish(shard, frag);
            return Err(e.into());
        }

        tracing::info!(
            "Fragment deleted: {}/{}/{}/{}",
            self.index,
            self.field,
            self.name,
            shard
        );
        Ok(())
    }

    /// 按列路由到 shard 并置位（fragment 不存在时创建）
    pub fn set_bit(&self, row: u64, column: u64) -> ViewResult<bool> {
        let frag = self.create_fragment_if_not_exists(shard_of(column))?;
        frag.set_bit(row, column)
    }

    /// 按列路由清位；shard 不存在时什么都不做
    pub fn clear_bit(&self, row: u64, column: u64) -> ViewResult<bool> {
        match self.fragment(shard_of(column)) {
            Some(frag) => frag.clear_bit(row, column),
            None => Ok(false),
        }
    }

    pub fn recalculate_caches(&self) {
        for f in self.fragments.load().values() {
            f.recalculate_cache();
        }
    }

    pub fn flush_caches(&self) -> ViewResult<()> {
        for f in self.all_fragments() {
            f.flush_cache()?;
        }
        Ok(())
    }

    pub fn report(&self) -> ViewReport {
        ViewReport {
            index: self.index.clone(),
            field: self.field.clone(),
            view: self.name.clone(),
            cache_type: self.options.effective_cache_type(),
            cache_size: self.options.cache_size,
            fragments: self.all_fragments().iter().map(|f| f.stats()).collect(),
        }
    }
}

fn parse_shard(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CacheType, SHARD_WIDTH};
    use crate::error::BroadcastError;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("frag-view-view-{}-{}", tag, nanos))
    }

    fn must_open_view(tag: &str, broadcaster: Arc<dyn Broadcaster>) -> View {
        let v = View::new(unique_tmp_dir(tag), "i", "f", "v", FieldOptions::default())
            .with_broadcaster(broadcaster);
        v.open().unwrap();
        v
    }

    /// 计数 + 可配置延迟；`fail_shard` 上的广播失败
    #[derive(Default)]
    struct CountingBroadcaster {
        delay: Duration,
        slow_shard: Option<u64>,
        fail_shard: Option<u64>,
        sent: Mutex<Vec<u64>>,
    }

    impl CountingBroadcaster {
        fn sent_for(&self, shard: u64) -> usize {
            self.sent.lock().iter().filter(|s| **s == shard).count()
        }
    }

    impl Broadcaster for CountingBroadcaster {
        fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError> {
            let shard = msg.shard();
            if self.slow_shard.map_or(true, |s| s == shard) {
                std::thread::sleep(self.delay);
            }
            if self.fail_shard == Some(shard) {
                return Err(BroadcastError::Rejected {
                    node: "node1".into(),
                    reason: "test".into(),
                });
            }
            self.sent.lock().push(shard);
            Ok(())
        }
    }

    #[test]
    fn delete_fragment_then_recreate_is_new() {
        let v = must_open_view("delete", Arc::new(NopBroadcaster));
        let shard = 9u64;

        let f1 = v.create_fragment_if_not_exists(shard).unwrap();
        f1.set_bit(3, shard * SHARD_WIDTH + 1).unwrap();

        v.delete_fragment(shard).unwrap();
        assert!(v.fragment(shard).is_none());
        assert!(!v.fragment_path(shard).exists());

        let f2 = v.create_fragment_if_not_exists(shard).unwrap();
        assert!(!Arc::ptr_eq(&f1, &f2));
        assert!(f2.row_ids().unwrap().is_empty());
        // 旧句柄已失效，不会与新实例共享状态
        assert!(matches!(
            f1.row_ids(),
            Err(ViewError::FragmentClosed { shard: 9 })
        ));
        v.close().unwrap();
    }

    #[test]
    fn delete_missing_shard_is_not_found() {
        let v = must_open_view("delete-missing", Arc::new(NopBroadcaster));
        let err = v.delete_fragment(1).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_fragment_race_single_instance_single_broadcast() {
        let b = Arc::new(CountingBroadcaster {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let v = must_open_view("race", b.clone());
        let shard = 0u64;

        let frags: Vec<Arc<Fragment>> = std::thread::scope(|s| {
            let hs: Vec<_> = (0..8)
                .map(|_| s.spawn(|| v.create_fragment_if_not_exists(shard).unwrap()))
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for f in &frags[1..] {
            assert!(Arc::ptr_eq(&frags[0], f));
        }
        assert_eq!(b.sent_for(shard), 1);
    }

    #[test]
    fn lookup_never_sees_unbroadcast_fragment() {
        let b = Arc::new(CountingBroadcaster {
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let v = must_open_view("publish", b.clone());

        std::thread::scope(|s| {
            let h = s.spawn(|| v.create_fragment_if_not_exists(5).unwrap());
            // 广播进行中：查找不阻塞且看不到半成品
            std::thread::sleep(Duration::from_millis(5));
            let started = Instant::now();
            let seen = v.fragment(5);
            assert!(started.elapsed() < Duration::from_millis(20));
            if seen.is_some() {
                assert_eq!(b.sent_for(5), 1);
            }
            h.join().unwrap();
        });
        assert!(v.fragment(5).is_some());
    }

    #[test]
    fn distinct_shards_do_not_wait_on_each_other() {
        let b = Arc::new(CountingBroadcaster {
            delay: Duration::from_millis(300),
            slow_shard: Some(1),
            ..Default::default()
        });
        let v = must_open_view("isolation", b.clone());

        std::thread::scope(|s| {
            let slow = s.spawn(|| v.create_fragment_if_not_exists(1).unwrap());
            std::thread::sleep(Duration::from_millis(20));

            let started = Instant::now();
            v.create_fragment_if_not_exists(2).unwrap();
            assert!(started.elapsed() < Duration::from_millis(250));

            slow.join().unwrap();
        });
        assert_eq!(v.shards(), vec![1, 2]);
        assert_eq!(b.sent_for(1), 1);
    }

    #[test]
    fn broadcast_failure_rolls_back() {
        let b = Arc::new(CountingBroadcaster {
            fail_shard: Some(3),
            ..Default::default()
        });
        let v = must_open_view("bcast-fail", b.clone());

        let err = v.create_fragment_if_not_exists(3).unwrap_err();
        assert!(err.is_broadcast());
        assert!(v.fragment(3).is_none());
        assert!(!v.fragment_path(3).exists());
        assert!(v.shards().is_empty());

        // 其他 shard 不受影响
        v.create_fragment_if_not_exists(4).unwrap();
        assert_eq!(v.shards(), vec![4]);
    }

    #[test]
    fn failed_op_log_open_leaves_no_data_file() {
        let dir = unique_tmp_dir("ops-dir");
        let b = Arc::new(CountingBroadcaster::default());
        let v =
            View::new(&dir, "i", "f", "v", FieldOptions::default()).with_broadcaster(b.clone());
        v.open().unwrap();
        let shard = 6u64;

        let ops = v.fragment_path(shard).with_extension("ops");
        std::fs::create_dir_all(&ops).unwrap();
        let err = v.create_fragment_if_not_exists(shard).unwrap_err();
        assert!(err.is_storage());
        assert!(v.fragment(shard).is_none());
        assert!(!v.fragment_path(shard).exists());
        assert_eq!(b.sent_for(shard), 0);

        // 重新打开不会把失败的创建恢复成 shard
        std::fs::remove_dir(&ops).unwrap();
        v.close().unwrap();
        v.open().unwrap();
        assert!(v.shards().is_empty());
    }

    #[test]
    fn close_waits_for_in_flight_create() {
        let b = Arc::new(CountingBroadcaster {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let v = must_open_view("close-race", b.clone());

        std::thread::scope(|s| {
            let h = s.spawn(|| v.create_fragment_if_not_exists(1));
            std::thread::sleep(Duration::from_millis(20));
            v.close().unwrap();

            assert!(!v.is_open());
            assert!(v.fragment(1).is_none());
            // 创建在 close 之前完成，其结果已被 close 一并关闭
            if let Ok(f) = h.join().unwrap() {
                assert!(!f.is_open());
            }
        });
        assert!(matches!(
            v.create_fragment_if_not_exists(2),
            Err(ViewError::NotOpen)
        ));
    }

    #[test]
    fn failed_delete_keeps_fragment_usable() {
        let v = must_open_view("delete-fail", Arc::new(NopBroadcaster));
        let shard = 2u64;
        let col = shard * SHARD_WIDTH + 5;
        let f = v.create_fragment_if_not_exists(shard).unwrap();
        f.set_bit(4, col).unwrap();

        // cache 文件位置是非空目录：remove_file 失败
        let cache = f.cache_path();
        std::fs::create_dir_all(cache.join("x")).unwrap();

        let err = v.delete_fragment(shard).unwrap_err();
        assert!(err.is_storage());
        let still = v.fragment(shard).unwrap();
        assert!(still.is_open());
        assert!(still.bit(4, col).unwrap());
        assert!(still.set_bit(4, col + 1).unwrap());

        std::fs::remove_dir_all(&cache).unwrap();
        v.delete_fragment(shard).unwrap();
        assert!(v.fragment(shard).is_none());
    }

    #[test]
    fn delete_and_create_race_on_shared_gate() {
        let b = Arc::new(CountingBroadcaster {
            delay: Duration::from_millis(2),
            ..Default::default()
        });
        let v = must_open_view("delete-race", b.clone());
        let shard = 3u64;
        v.create_fragment_if_not_exists(shard).unwrap();

        let deleted: usize = std::thread::scope(|s| {
            let mut hs = Vec::new();
            for i in 0..8 {
                let v = &v;
                hs.push(s.spawn(move || {
                    if i % 2 == 0 {
                        usize::from(v.delete_fragment(shard).is_ok())
                    } else {
                        v.create_fragment_if_not_exists(shard).unwrap();
                        0
                    }
                }));
            }
            hs.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 创建与删除在 gate 上严格交替：广播数 = 成功删除数 + 最终是否存在
        let present = v.fragment(shard);
        assert_eq!(
            b.sent_for(shard),
            deleted + usize::from(present.is_some())
        );
        match present {
            Some(f) => {
                assert!(f.is_open());
                assert!(v.fragment_path(shard).exists());
            }
            None => assert!(!v.fragment_path(shard).exists()),
        }
    }

    #[test]
    fn storage_failure_leaves_no_residue() {
        let v = must_open_view("storage-fail", Arc::new(NopBroadcaster));
        let shard = 6u64;

        // 数据文件位置被损坏内容占据
        std::fs::write(v.fragment_path(shard), b"garbage").unwrap();
        let err = v.create_fragment_if_not_exists(shard).unwrap_err();
        assert!(err.is_storage());
        assert!(v.fragment(shard).is_none());

        std::fs::remove_file(v.fragment_path(shard)).unwrap();
        let f = v.create_fragment_if_not_exists(shard).unwrap();
        assert_eq!(f.shard(), shard);
        assert!(Arc::ptr_eq(&f, &v.fragment(shard).unwrap()));
    }

    #[test]
    fn existing_fragment_returned_without_broadcast() {
        let b = Arc::new(CountingBroadcaster::default());
        let v = must_open_view("existing", b.clone());
        let f1 = v.create_fragment_if_not_exists(7).unwrap();
        let f2 = v.create_fragment_if_not_exists(7).unwrap();
        assert!(Arc::ptr_eq(&f1, &f2));
        assert_eq!(b.sent_for(7), 1);
    }

    #[test]
    fn reopen_recovers_fragments() {
        let dir = unique_tmp_dir("reopen");
        let v = View::new(&dir, "i", "f", "v", FieldOptions::default());
        v.open().unwrap();
        v.set_bit(1, 5).unwrap();
        v.set_bit(2, 3 * SHARD_WIDTH + 8).unwrap();
        v.close().unwrap();
        assert!(v.fragment(0).is_none());

        // 附属文件不应被当成 shard
        std::fs::write(dir.join("fragments").join("notes.txt"), b"x").unwrap();

        let b = Arc::new(CountingBroadcaster::default());
        let v2 =
            View::new(&dir, "i", "f", "v", FieldOptions::default()).with_broadcaster(b.clone());
        v2.open().unwrap();
        assert_eq!(v2.shards(), vec![0, 3]);
        assert_eq!(
            v2.fragment(3).unwrap().row(2).unwrap(),
            vec![3 * SHARD_WIDTH + 8]
        );
        // 恢复不是创建，不广播
        assert!(b.sent.lock().is_empty());
    }

    #[test]
    fn open_fails_on_corrupt_fragment() {
        let dir = unique_tmp_dir("corrupt");
        std::fs::create_dir_all(dir.join("fragments")).unwrap();
        std::fs::write(dir.join("fragments").join("2"), b"bad").unwrap();

        let v = View::new(&dir, "i", "f", "v", FieldOptions::default());
        let err = v.open().unwrap_err();
        assert!(err.is_storage());
        assert!(!v.is_open());
        assert!(matches!(
            v.create_fragment_if_not_exists(1),
            Err(ViewError::NotOpen)
        ));
    }

    #[test]
    fn close_without_open_is_noop() {
        let v = View::new(unique_tmp_dir("noop"), "i", "f", "v", FieldOptions::default());
        v.close().unwrap();
        v.close().unwrap();
    }

    #[test]
    fn every_fragment_uses_field_cache_policy() {
        let dir = unique_tmp_dir("policy");
        let v = View::new(&dir, "i", "f", "v", FieldOptions::new(CacheType::Lru, 2));
        v.open().unwrap();
        for shard in 0..3u64 {
            for row in 0..5u64 {
                v.set_bit(row, shard * SHARD_WIDTH + row).unwrap();
            }
        }
        for f in v.all_fragments() {
            assert_eq!(f.cache_type(), CacheType::Lru);
            assert_eq!(f.cache_len(), 2);
        }
        let r = v.report();
        assert_eq!(r.fragments.len(), 3);
        assert_eq!(r.total_bits(), 15);
    }

    #[test]
    fn clear_bit_on_missing_shard_does_not_create() {
        let v = must_open_view("clear", Arc::new(NopBroadcaster));
        assert!(!v.clear_bit(1, 10 * SHARD_WIDTH).unwrap());
        assert!(v.fragment(10).is_none());
    }
}
