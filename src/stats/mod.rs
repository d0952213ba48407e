use std::fmt;

use serde::Serialize;

use crate::core::CacheType;
use crate::fragment::FragmentStats;

/// View 级统计：每个 fragment 一行
#[derive(Clone, Debug, Serialize)]
pub struct ViewReport {
    pub index: String,
    pub field: String,
    pub view: String,
    /// 生效的缓存类型（size 为 0 时为 none）
    pub cache_type: CacheType,
    pub cache_size: u32,
    pub fragments: Vec<FragmentStats>,
}

impl ViewReport {
    pub fn total_rows(&self) -> usize {
        self.fragments.iter().map(|f| f.rows).sum()
    }

    pub fn total_bits(&self) -> u64 {
        self.fragments.iter().map(|f| f.bits).sum()
    }

    pub fn total_bitmap_bytes(&self) -> u64 {
        self.fragments.iter().map(|f| f.bitmap_bytes).sum()
    }

    pub fn total_pending_ops(&self) -> usize {
        self.fragments.iter().map(|f| f.pending_ops).sum()
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for ViewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("{}/{}/{}", self.index, self.field, self.view);
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║ View: {:<42} ║", title)?;
        writeln!(
            f,
            "║ Cache: {:<6} size {:<29} ║",
            self.cache_type.as_str(),
            self.cache_size
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(
            f,
            "║ {:>8} {:>7} {:>10} {:>10} {:>9} ║",
            "shard", "rows", "bits", "bytes", "cache"
        )?;
        for frag in &self.fragments {
            writeln!(
                f,
                "║ {:>8} {:>7} {:>10} {:>10} {:>9} ║",
                frag.shard,
                frag.rows,
                frag.bits,
                human_bytes(frag.bitmap_bytes),
                frag.cache_entries
            )?;
        }
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(
            f,
            "║   fragments:    {:>10}                       ║",
            self.fragments.len()
        )?;
        writeln!(
            f,
            "║   rows:         {:>10}                       ║",
            self.total_rows()
        )?;
        writeln!(
            f,
            "║   bits:         {:>10}                       ║",
            self.total_bits()
        )?;
        writeln!(
            f,
            "║   bitmaps:      {:>10}                       ║",
            human_bytes(self.total_bitmap_bytes())
        )?;
        writeln!(
            f,
            "║   pending ops:  {:>10}                       ║",
            self.total_pending_ops()
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(shard: u64, rows: usize, bits: u64) -> FragmentStats {
        FragmentStats {
            shard,
            rows,
            bits,
            bitmap_bytes: bits * 2,
            cache_entries: rows,
            pending_ops: 1,
        }
    }

    #[test]
    fn totals_sum_fragments() {
        let r = ViewReport {
            index: "i".into(),
            field: "f".into(),
            view: "standard".into(),
            cache_type: CacheType::Ranked,
            cache_size: 10,
            fragments: vec![frag(0, 2, 5), frag(3, 1, 7)],
        };
        assert_eq!(r.total_rows(), 3);
        assert_eq!(r.total_bits(), 12);
        assert_eq!(r.total_pending_ops(), 2);

        let text = r.to_string();
        assert!(text.contains("i/f/standard"));
        assert!(text.contains("ranked"));

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["cache_type"], "ranked");
        assert_eq!(json["fragments"][1]["shard"], 3);
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(10), "10 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
