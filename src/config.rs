use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{FieldOptions, VIEW_STANDARD};

/// 进程配置（toml）。缺省字段取默认值，CLI 参数可再覆盖。
///
/// ```toml
/// data_dir = "/var/lib/frag-view"
/// index = "i"
/// field = "f"
/// view = "standard"
///
/// [field_options]
/// cache_type = "lru"
/// cache_size = 1000
/// max_op_n = 10000
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub index: String,
    pub field: String,
    pub view: String,
    pub field_options: FieldOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index: "default".to_string(),
            field: "default".to_string(),
            view: VIEW_STANDARD.to_string(),
            field_options: FieldOptions::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("frag-view")
}

impl Config {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parse config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// 未指定路径时使用默认配置；指定了但读不到则报错
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// `<data_dir>/<index>/<field>/views/<view>`
    pub fn view_path(&self) -> PathBuf {
        self.data_dir
            .join(&self.index)
            .join(&self.field)
            .join("views")
            .join(&self.view)
    }
}
