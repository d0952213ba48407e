use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use frag_view::core::CacheType;
use frag_view::{Config, TopOptions, View};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "frag-view")]
#[command(about = "Inspect and mutate the shard fragments of a single field view")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// toml 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    index: Option<String>,

    #[arg(long)]
    field: Option<String>,

    #[arg(long)]
    view: Option<String>,

    #[arg(long)]
    cache_type: Option<CacheType>,

    #[arg(long)]
    cache_size: Option<u32>,

    /// JSON 输出
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List shards that have a fragment
    Shards,
    /// Create the fragment for a shard (broadcast once)
    Create { shard: u64 },
    /// Delete the fragment for a shard and its files
    Delete { shard: u64 },
    /// Set a bit (creates the shard's fragment on demand)
    Set { row: u64, column: u64 },
    /// Clear a bit
    Clear { row: u64, column: u64 },
    /// Top rows of one shard by bit count
    Top {
        shard: u64,
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
    /// Per-fragment statistics
    Info,
}

impl Args {
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut cfg = Config::load_or_default(self.config.as_deref())?;
        if let Some(d) = &self.data_dir {
            cfg.data_dir = d.clone();
        }
        if let Some(s) = &self.index {
            cfg.index = s.clone();
        }
        if let Some(s) = &self.field {
            cfg.field = s.clone();
        }
        if let Some(s) = &self.view {
            cfg.view = s.clone();
        }
        if let Some(t) = self.cache_type {
            cfg.field_options.cache_type = t;
        }
        if let Some(n) = self.cache_size {
            cfg.field_options.cache_size = n;
        }
        Ok(cfg)
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: &Args, view: &View) -> anyhow::Result<()> {
    match &args.command {
        Command::Shards => {
            let shards = view.shards();
            if args.json {
                print_json(&shards)?;
            } else {
                for s in shards {
                    println!("{s}");
                }
            }
        }
        Command::Create { shard } => {
            let frag = view.create_fragment_if_not_exists(*shard)?;
            println!("fragment {} at {}", frag.shard(), frag.path().display());
        }
        Command::Delete { shard } => match view.delete_fragment(*shard) {
            Ok(()) => println!("deleted shard {shard}"),
            Err(e) if e.is_not_found() => println!("shard {shard} not found"),
            Err(e) => return Err(e.into()),
        },
        Command::Set { row, column } => {
            let changed = view.set_bit(*row, *column)?;
            println!("{changed}");
        }
        Command::Clear { row, column } => {
            let changed = view.clear_bit(*row, *column)?;
            println!("{changed}");
        }
        Command::Top { shard, n } => {
            let frag = view
                .fragment(*shard)
                .with_context(|| format!("shard {shard} not found"))?;
            let pairs = frag.top(&TopOptions {
                n: *n,
                ..Default::default()
            })?;
            if args.json {
                print_json(&pairs)?;
            } else {
                for p in pairs {
                    println!("{:>12} {:>10}", p.id, p.count);
                }
            }
        }
        Command::Info => {
            let report = view.report();
            if args.json {
                print_json(&report)?;
            } else {
                print!("{report}");
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = args.resolve_config()?;
    info!(
        "frag-view: {}/{}/{} under {:?}",
        cfg.index, cfg.field, cfg.view, cfg.data_dir
    );

    let view = View::new(
        cfg.view_path(),
        &cfg.index,
        &cfg.field,
        &cfg.view,
        cfg.field_options.clone(),
    );
    view.open()
        .with_context(|| format!("open view at {}", view.path().display()))?;

    let result = run(&args, &view);
    // 无论命令是否成功都关闭，op log 落盘
    let closed = view.close();
    result?;
    closed?;
    Ok(())
}
