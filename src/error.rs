use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type ViewResult<T> = std::result::Result<T, ViewError>;

/// 磁盘侧失败：创建/读取/删除 fragment 文件，或数据文件校验不通过。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fragment file {path:?} corrupted: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("not acknowledged within {0:?}")]
    Timeout(Duration),

    #[error("cluster channel disconnected")]
    Disconnected,

    #[error("rejected by {node}: {reason}")]
    Rejected { node: String, reason: String },

    #[error("encode message: {0}")]
    Encode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("broadcast create of shard {shard} failed: {source}")]
    Broadcast {
        shard: u64,
        #[source]
        source: BroadcastError,
    },

    #[error("fragment not found: shard {shard}")]
    NotFound { shard: u64 },

    #[error("view is not open")]
    NotOpen,

    #[error("fragment closed: shard {shard}")]
    FragmentClosed { shard: u64 },

    #[error("column {column} is outside shard {shard}")]
    ColumnOutOfShard { column: u64, shard: u64 },

    #[error(transparent)]
    Attr(#[from] anyhow::Error),
}

impl ViewError {
    /// 删除不存在的 shard 属于良性结果，调用方通常忽略。
    pub fn is_not_found(&self) -> bool {
        matches!(self, ViewError::NotFound { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, ViewError::Storage(_))
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, ViewError::Broadcast { .. })
    }
}
