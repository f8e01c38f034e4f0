//! Command-line configuration surface for the server binary.
use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::aof::SyncPolicy;

const DEFAULT_PORT: u16 = 6380;
const DEFAULT_AOF_PATH: &str = "redis.aof";
const DEFAULT_MAXMEMORY_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AppendFsync {
    Everysec,
    No,
}

// `default_value_t` stringifies the default via `Display`, which the
// `ValueEnum` derive does not provide on its own.
impl fmt::Display for AppendFsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_possible_value().expect("no skipped variants").get_name().fmt(f)
    }
}

#[derive(Debug, Parser)]
#[command(name = "redikv-server", version, author)]
/// A single-threaded, RESP-compatible in-memory key/value server.
pub struct Cli {
    /// Port to listen on.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path to the append-only file.
    #[arg(long, default_value = DEFAULT_AOF_PATH)]
    pub aof_path: PathBuf,

    /// Disable AOF persistence entirely.
    #[arg(long)]
    pub no_aof: bool,

    /// AOF fsync policy.
    #[arg(long, value_enum, default_value_t = AppendFsync::Everysec)]
    pub appendfsync: AppendFsync,

    /// Memory limit in bytes before LFU eviction kicks in.
    #[arg(long, default_value_t = DEFAULT_MAXMEMORY_BYTES)]
    pub maxmemory: u64,
}

impl Cli {
    pub fn sync_policy(&self) -> SyncPolicy {
        match self.appendfsync {
            AppendFsync::Everysec => SyncPolicy::EverySec,
            AppendFsync::No => SyncPolicy::No,
        }
    }
}
