use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// set 时表示删除该 key
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

pub type Attrs = BTreeMap<String, AttrValue>;

/// 行属性存储（外部协作者）：row id → 属性集合。
/// View/Fragment 只持有共享引用，语义全部委托给实现方。
pub trait AttrStore: Send + Sync {
    fn attrs(&self, id: u64) -> anyhow::Result<Option<Attrs>>;

    /// 合并写入；`AttrValue::Null` 删除对应 key
    fn set_attrs(&self, id: u64, attrs: Attrs) -> anyhow::Result<()>;

    fn set_bulk_attrs(&self, bulk: Vec<(u64, Attrs)>) -> anyhow::Result<()> {
        for (id, attrs) in bulk {
            self.set_attrs(id, attrs)?;
        }
        Ok(())
    }
}

/// 内存实现（测试 / 单机）
#[derive(Debug, Default)]
pub struct MemAttrStore {
    store: RwLock<HashMap<u64, Attrs>>,
}

impl MemAttrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttrStore for MemAttrStore {
    fn attrs(&self, id: u64) -> anyhow::Result<Option<Attrs>> {
        Ok(self.store.read().get(&id).cloned())
    }

    fn set_attrs(&self, id: u64, attrs: Attrs) -> anyhow::Result<()> {
        let mut g = self.store.write();
        let cur = g.entry(id).or_default();
        for (k, v) in attrs {
            if v == AttrValue::Null {
                cur.remove(&k);
            } else {
                cur.insert(k, v);
            }
        }
        if cur.is_empty() {
            g.remove(&id);
        }
        Ok(())
    }
}
