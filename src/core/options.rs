use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 每个 shard 覆盖的列数（列 → shard：`col / SHARD_WIDTH`）
pub const SHARD_WIDTH: u64 = 1 << 20;

pub const DEFAULT_CACHE_SIZE: u32 = 50_000;
pub const DEFAULT_MAX_OP_N: usize = 10_000;

/// 默认 view 名
pub const VIEW_STANDARD: &str = "standard";

/// 行缓存策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// 按行 bit 数排名，满时淘汰排名最低的行
    #[default]
    Ranked,
    /// 满时淘汰最久未访问的行
    Lru,
    /// 不缓存
    None,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Ranked => "ranked",
            CacheType::Lru => "lru",
            CacheType::None => "none",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ranked" => Ok(CacheType::Ranked),
            "lru" => Ok(CacheType::Lru),
            "none" => Ok(CacheType::None),
            other => Err(format!("unknown cache type: {other}")),
        }
    }
}

/// Field 级配置：由 index/field 层传入，View 生命周期内不可变。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    pub cache_type: CacheType,
    pub cache_size: u32,
    /// op log 超过该条数后 fragment 自动做快照
    pub max_op_n: usize,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Ranked,
            cache_size: DEFAULT_CACHE_SIZE,
            max_op_n: DEFAULT_MAX_OP_N,
        }
    }
}

impl FieldOptions {
    pub fn new(cache_type: CacheType, cache_size: u32) -> Self {
        Self {
            cache_type,
            cache_size,
            ..Self::default()
        }
    }

    pub fn with_max_op_n(mut self, max_op_n: usize) -> Self {
        self.max_op_n = max_op_n;
        self
    }

    /// size 为 0 时等价于不缓存
    pub fn effective_cache_type(&self) -> CacheType {
        if self.cache_size == 0 {
            CacheType::None
        } else {
            self.cache_type
        }
    }
}

pub fn shard_of(column: u64) -> u64 {
    column / SHARD_WIDTH
}
