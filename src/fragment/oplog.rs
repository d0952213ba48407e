use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::xxh3_64;

use crate::error::StorageError;
use crate::fragment::storage::open_append;

const OPLOG_MAGIC: u32 = 0x474F_5046; // "FPOG"
const OPLOG_VERSION: u32 = 1;
const OPLOG_HEADER: usize = 8;
const RECORD_HEADER: usize = 4 + 8; // len + xxh3
const OP_PAYLOAD: usize = 1 + 8 + 4; // kind + row + pos

/// fragment 的单条变更
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Op {
    Set { row: u64, pos: u32 },
    Clear { row: u64, pos: u32 },
}

impl Op {
    fn encode(&self) -> [u8; OP_PAYLOAD] {
        let (kind, row, pos) = match *self {
            Op::Set { row, pos } => (1u8, row, pos),
            Op::Clear { row, pos } => (2u8, row, pos),
        };
        let mut out = [0u8; OP_PAYLOAD];
        out[0] = kind;
        out[1..9].copy_from_slice(&row.to_le_bytes());
        out[9..13].copy_from_slice(&pos.to_le_bytes());
        out
    }

    fn decode(buf: &[u8]) -> Option<Op> {
        if buf.len() != OP_PAYLOAD {
            return None;
        }
        let row = u64::from_le_bytes(buf[1..9].try_into().ok()?);
        let pos = u32::from_le_bytes(buf[9..13].try_into().ok()?);
        match buf[0] {
            1 => Some(Op::Set { row, pos }),
            2 => Some(Op::Clear { row, pos }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct OpLogReplay {
    pub ops: Vec<Op>,
    /// 校验失败/截断的尾部记录数（崩溃残留，已被截掉）
    pub truncated_tail: usize,
}

/// Append-only 变更日志：`<shard>.ops`。
///
/// 快照（数据文件）之后的全部变更按顺序追加在这里；
/// 快照完成后 `reset` 清空为只剩 header。
pub(crate) struct OpLog {
    path: PathBuf,
    file: File,
}

impl OpLog {
    /// 打开（不存在则初始化），回放已有记录，并截掉损坏的尾部。
    pub fn open(path: PathBuf) -> Result<(Self, OpLogReplay), StorageError> {
        let (ops, valid_len, truncated_tail) = read_ops(&path)?;

        match valid_len {
            None => write_header(&path)?,
            Some(len) if truncated_tail > 0 => {
                let f = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| StorageError::io("open", &path, e))?;
                f.set_len(len)
                    .map_err(|e| StorageError::io("truncate", &path, e))?;
            }
            Some(_) => {}
        }

        let file = open_append(&path)?;
        Ok((
            Self { path, file },
            OpLogReplay {
                ops,
                truncated_tail,
            },
        ))
    }

    pub fn append(&mut self, op: Op) -> Result<(), StorageError> {
        let payload = op.encode();
        let mut rec = [0u8; RECORD_HEADER + OP_PAYLOAD];
        rec[0..4].copy_from_slice(&(OP_PAYLOAD as u32).to_le_bytes());
        rec[4..12].copy_from_slice(&xxh3_64(&payload).to_le_bytes());
        rec[12..].copy_from_slice(&payload);
        self.file
            .write_all(&rec)
            .map_err(|e| StorageError::io("append", &self.path, e))
    }

    /// 快照之后清空（保留 header）
    pub fn reset(&mut self) -> Result<(), StorageError> {
        self.file
            .set_len(OPLOG_HEADER as u64)
            .map_err(|e| StorageError::io("truncate", &self.path, e))
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        self.file
            .sync_data()
            .map_err(|e| StorageError::io("sync", &self.path, e))
    }
}

fn write_header(path: &Path) -> Result<(), StorageError> {
    let mut f = File::create(path).map_err(|e| StorageError::io("create", path, e))?;
    let mut hdr = [0u8; OPLOG_HEADER];
    hdr[0..4].copy_from_slice(&OPLOG_MAGIC.to_le_bytes());
    hdr[4..8].copy_from_slice(&OPLOG_VERSION.to_le_bytes());
    f.write_all(&hdr)
        .map_err(|e| StorageError::io("write", path, e))
}

/// 返回 (ops, 有效长度, 截断的尾部记录数)；有效长度为 None 表示需要重建 header。
fn read_ops(path: &Path) -> Result<(Vec<Op>, Option<u64>, usize), StorageError> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), None, 0)),
        Err(e) => return Err(StorageError::io("open", path, e)),
    };
    let mut data = Vec::new();
    f.read_to_end(&mut data)
        .map_err(|e| StorageError::io("read", path, e))?;

    if data.len() < OPLOG_HEADER {
        // 空文件/截断 header：重写 header
        return Ok((Vec::new(), None, 0));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let ver = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if magic != OPLOG_MAGIC || ver != OPLOG_VERSION {
        return Err(StorageError::corrupt(
            path,
            format!("op log header mismatch: magic={magic:#x} version={ver}"),
        ));
    }

    let mut ops = Vec::new();
    let mut off = OPLOG_HEADER;
    let mut truncated_tail = 0usize;
    while off < data.len() {
        let Some(hdr) = data.get(off..off + RECORD_HEADER) else {
            truncated_tail += 1;
            break;
        };
        let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]) as usize;
        let mut crc = [0u8; 8];
        crc.copy_from_slice(&hdr[4..12]);
        let crc = u64::from_le_bytes(crc);

        let start = off + RECORD_HEADER;
        let Some(payload) = data.get(start..start + len) else {
            truncated_tail += 1;
            break;
        };
        if xxh3_64(payload) != crc {
            // 校验失败：视为截断/损坏，停止读取（保守）
            truncated_tail += 1;
            break;
        }
        let Some(op) = Op::decode(payload) else {
            truncated_tail += 1;
            break;
        };
        ops.push(op);
        off = start + len;
    }

    Ok((ops, Some(off as u64), truncated_tail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("frag-view-oplog-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn append_then_replay_in_order() {
        let dir = unique_tmp_dir("replay");
        let path = dir.join("0.ops");

        let (mut log, r) = OpLog::open(path.clone()).unwrap();
        assert!(r.ops.is_empty());
        log.append(Op::Set { row: 1, pos: 10 }).unwrap();
        log.append(Op::Clear { row: 1, pos: 10 }).unwrap();
        drop(log);

        let (_log, r) = OpLog::open(path).unwrap();
        assert_eq!(
            r.ops,
            vec![Op::Set { row: 1, pos: 10 }, Op::Clear { row: 1, pos: 10 }]
        );
        assert_eq!(r.truncated_tail, 0);
    }

    #[test]
    fn torn_tail_is_dropped_and_truncated() {
        let dir = unique_tmp_dir("torn");
        let path = dir.join("0.ops");

        let (mut log, _) = OpLog::open(path.clone()).unwrap();
        log.append(Op::Set { row: 2, pos: 3 }).unwrap();
        drop(log);

        // 模拟写到一半崩溃
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[13, 0, 0, 0, 1, 2]).unwrap();
        drop(f);

        let (mut log, r) = OpLog::open(path.clone()).unwrap();
        assert_eq!(r.ops, vec![Op::Set { row: 2, pos: 3 }]);
        assert_eq!(r.truncated_tail, 1);

        // 截断后继续追加仍可完整回放
        log.append(Op::Set { row: 2, pos: 4 }).unwrap();
        drop(log);
        let (_log, r) = OpLog::open(path).unwrap();
        assert_eq!(r.ops.len(), 2);
        assert_eq!(r.truncated_tail, 0);
    }

    #[test]
    fn reset_keeps_header_only() {
        let dir = unique_tmp_dir("reset");
        let path = dir.join("0.ops");
        let (mut log, _) = OpLog::open(path.clone()).unwrap();
        log.append(Op::Set { row: 1, pos: 1 }).unwrap();
        log.reset().unwrap();
        log.append(Op::Set { row: 9, pos: 9 }).unwrap();
        drop(log);

        let (_log, r) = OpLog::open(path.clone()).unwrap();
        assert_eq!(r.ops, vec![Op::Set { row: 9, pos: 9 }]);
    }
}
