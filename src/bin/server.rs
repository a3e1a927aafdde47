//! blobdepot Server Binary
//!
//! Runs a depot behind the TCP transport.

use std::time::Duration;

use blobdepot::network::Server;
use blobdepot::types::{ChannelKindEntry, KeyMode};
use blobdepot::Config;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyModeArg {
    BlobIds,
    BinaryKeys,
}

impl From<KeyModeArg> for KeyMode {
    fn from(arg: KeyModeArg) -> Self {
        match arg {
            KeyModeArg::BlobIds => KeyMode::BlobIds,
            KeyModeArg::BinaryKeys => KeyMode::BinaryKeys,
        }
    }
}

/// blobdepot Server
#[derive(Parser, Debug)]
#[command(name = "blobdepot-server")]
#[command(about = "Depot of a virtual blob group")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./blobdepot_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7480")]
    listen: String,

    /// Maximum concurrent agent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "16")]
    memtable_mb: usize,

    /// Rows per index page
    #[arg(long, default_value = "256")]
    rows_per_page: usize,

    /// Index pages kept resident
    #[arg(long, default_value = "1024")]
    page_cache: usize,

    /// Tablet id blobs are issued under
    #[arg(short, long, default_value = "1")]
    tablet_id: u64,

    #[arg(long, value_enum, default_value = "blob-ids")]
    key_mode: KeyModeArg,

    /// Channel kind assignment, e.g. `data=2@2001,3@2002` (repeatable)
    #[arg(long = "channel-kind")]
    channel_kinds: Vec<ChannelKindEntry>,

    /// Predecessor group being decommissioned
    #[arg(long)]
    decommit_group: Option<u32>,

    /// Max serialized size of one resolve response in KB
    #[arg(long, default_value = "8192")]
    max_message_kb: usize,

    /// Report resolves running longer than this (ms)
    #[arg(long, default_value = "5000")]
    watchdog_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blobdepot=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("blobdepot server v{}", blobdepot::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .rows_per_page(args.rows_per_page)
        .page_cache_capacity(args.page_cache)
        .tablet_id(args.tablet_id)
        .key_mode(args.key_mode.into())
        .decommit_group_id(args.decommit_group)
        .max_message_size(args.max_message_kb * 1024)
        .watchdog_period(Duration::from_millis(args.watchdog_ms));
    if !args.channel_kinds.is_empty() {
        builder = builder.channel_kinds(args.channel_kinds);
    }
    let config = builder.build();

    let mut server = Server::new(config);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
