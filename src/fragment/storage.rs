use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::Mmap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::error::StorageError;

/// fragment 数据文件 Header
const MAGIC: u32 = 0xF7A6_0001;
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8; // magic + version + state + data_len + xxh3

#[derive(Serialize, Deserialize)]
struct RowRecord {
    id: u64,
    /// roaring 原生序列化格式
    bitmap: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FragmentBody {
    shard: u64,
    rows: Vec<RowRecord>,
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u64) {
        (self.bytes, self.hasher.digest())
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn header(state: u32, data_len: u64, checksum: u64) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    h[8..12].copy_from_slice(&state.to_le_bytes());
    h[12..20].copy_from_slice(&data_len.to_le_bytes());
    h[20..28].copy_from_slice(&checksum.to_le_bytes());
    h
}

/// 原子写入 fragment 数据文件，返回写入字节数。
///
/// 落盘流程：
/// 1) 写 `<shard>.tmp` 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into` 流式写 body，边写边计算 xxh3 / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(tmpfile)
/// 5) rename(tmp, target)：原子替换
/// 6) fsync(dir)
///
/// 任一步骤前崩溃，target 保持旧内容；加载时 header 任何不一致都报错。
pub(crate) fn write_data_file(
    path: &Path,
    shard: u64,
    rows: &BTreeMap<u64, RoaringBitmap>,
) -> Result<u64, StorageError> {
    let body = FragmentBody {
        shard,
        rows: rows
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(id, b)| {
                let mut buf = Vec::with_capacity(b.serialized_size());
                b.serialize_into(&mut buf)
                    .map_err(|e| StorageError::io("serialize row", path, e))?;
                Ok(RowRecord { id: *id, bitmap: buf })
            })
            .collect::<Result<Vec<_>, StorageError>>()?,
    };

    let tmp_path = path.with_extension("tmp");
    let mut file =
        File::create(&tmp_path).map_err(|e| StorageError::io("create", &tmp_path, e))?;
    file.write_all(&header(STATE_INCOMPLETE, 0, 0))
        .map_err(|e| StorageError::io("write", &tmp_path, e))?;

    let (data_len, checksum) = {
        let mut cw = ChecksumWriter::new(&mut file);
        bincode::serialize_into(&mut cw, &body).map_err(|source| StorageError::Encode {
            path: tmp_path.clone(),
            source,
        })?;
        cw.finish()
    };

    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&header(STATE_COMMITTED, data_len, checksum)))
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io("commit", &tmp_path, e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io("rename", path, e))?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(HEADER_SIZE as u64 + data_len)
}

/// 读取并校验数据文件（magic/version/state/len/checksum），任何不一致都视为损坏。
pub(crate) fn read_data_file(
    path: &Path,
    shard: u64,
) -> Result<BTreeMap<u64, RoaringBitmap>, StorageError> {
    let file = File::open(path).map_err(|e| StorageError::io("open", path, e))?;
    let len = file
        .metadata()
        .map_err(|e| StorageError::io("stat", path, e))?
        .len();
    if len < HEADER_SIZE as u64 {
        return Err(StorageError::corrupt(
            path,
            format!("file too small ({len} bytes)"),
        ));
    }

    // 只读映射：文件只会被 rename 整体替换，不会原地改写
    let data = unsafe { Mmap::map(&file) }.map_err(|e| StorageError::io("mmap", path, e))?;

    let u32_at = |off: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&data[off..off + 4]);
        u32::from_le_bytes(b)
    };
    let u64_at = |off: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&data[off..off + 8]);
        u64::from_le_bytes(b)
    };

    let magic = u32_at(0);
    let version = u32_at(4);
    let state = u32_at(8);
    let data_len = u64_at(12);
    let stored_checksum = u64_at(20);

    if magic != MAGIC {
        return Err(StorageError::corrupt(
            path,
            format!("magic mismatch: {magic:#x} != {MAGIC:#x}"),
        ));
    }
    if version != VERSION_CURRENT {
        return Err(StorageError::corrupt(
            path,
            format!("unsupported version {version}"),
        ));
    }
    if state != STATE_COMMITTED {
        return Err(StorageError::corrupt(path, "state INCOMPLETE"));
    }

    let body = &data[HEADER_SIZE..];
    if body.len() as u64 != data_len {
        return Err(StorageError::corrupt(
            path,
            format!("data length mismatch: {} != {}", body.len(), data_len),
        ));
    }
    let computed = xxh3_64(body);
    if computed != stored_checksum {
        return Err(StorageError::corrupt(
            path,
            format!("checksum mismatch: {computed:#x} != {stored_checksum:#x}"),
        ));
    }

    let decoded: FragmentBody =
        bincode::deserialize(body).map_err(|e| StorageError::corrupt(path, e.to_string()))?;
    if decoded.shard != shard {
        return Err(StorageError::corrupt(
            path,
            format!("belongs to shard {}, expected {}", decoded.shard, shard),
        ));
    }

    let mut rows = BTreeMap::new();
    for rec in decoded.rows {
        let b = RoaringBitmap::deserialize_from(&rec.bitmap[..])
            .map_err(|e| StorageError::corrupt(path, format!("row {}: {}", rec.id, e)))?;
        rows.insert(rec.id, b);
    }
    Ok(rows)
}

/// cache 文件：被缓存的 row id 列表（派生数据，损坏时由调用方忽略）
pub(crate) fn write_cache_file(path: &Path, ids: &[u64]) -> Result<(), StorageError> {
    let data = bincode::serialize(ids).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = path.with_extension("cache.tmp");
    std::fs::write(&tmp_path, data).map_err(|e| StorageError::io("write", &tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io("rename", path, e))
}

pub(crate) fn read_cache_file(path: &Path) -> Result<Option<Vec<u64>>, StorageError> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io("read", path, e)),
    };
    bincode::deserialize(&data)
        .map(Some)
        .map_err(|e| StorageError::corrupt(path, e.to_string()))
}

/// 删除文件；不存在视为成功
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io("remove", path, e)),
    }
}

/// 以追加模式打开（必要时创建）
pub(crate) fn open_append(path: &Path) -> Result<File, StorageError> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io("open", path, e))
}
