#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod fragment;
pub mod stats;
pub mod view;

pub use config::Config;
pub use error::{BroadcastError, StorageError, ViewError, ViewResult};
pub use fragment::{AttrFilter, Fragment, FragmentStats, TopOptions};
pub use stats::ViewReport;
pub use view::View;
