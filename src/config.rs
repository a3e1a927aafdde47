//! Configuration for blobdepot
//!
//! Centralized configuration with sensible defaults. One `Config` serves both
//! halves of the system: the depot reads the storage and depot sections, the
//! agent reads the agent section, and the binaries read the network section.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{ChannelGroup, ChannelKindEntry, ChannelKindId, KeyMode};

/// Main configuration for a blobdepot instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all depot data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log of index mutations)
    ///     ├── ledger.meta      (generation + allocation high-water marks)
    ///     └── tables/          (paged index tables)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Max size of memtable before it is folded into a table (in bytes)
    pub memtable_size_limit: usize,

    /// Rows per table page; a page is the unit of residency
    pub rows_per_page: usize,

    /// Number of table pages kept resident at once
    pub page_cache_capacity: usize,

    // -------------------------------------------------------------------------
    // Depot Configuration
    // -------------------------------------------------------------------------
    /// Tablet id of the depot; physical blob ids are issued under it
    pub tablet_id: u64,

    /// Interpretation of keys on the wire and in the index
    pub key_mode: KeyMode,

    /// Channel kinds and the channels assigned to each
    pub channel_kinds: Vec<ChannelKindEntry>,

    /// Predecessor group being decommissioned, if any
    pub decommit_group_id: Option<u32>,

    /// Upper bound on one serialized resolve response (in bytes)
    pub max_message_size: usize,

    /// Resolve requests running longer than this are reported
    pub watchdog_period: Duration,

    // -------------------------------------------------------------------------
    // Agent Configuration
    // -------------------------------------------------------------------------
    /// Virtual group id the agent serves
    pub virtual_group_id: u32,

    /// Refill is requested once the pool drops below this many ids
    pub low_watermark: u64,

    /// Number of ids requested per refill
    pub allocate_batch: u32,

    /// Reconnect policy for the agent's link to the depot
    pub retry_policy: RetryPolicy,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent agent connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Exponential backoff for reconnecting to the depot
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blobdepot_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 16 * 1024 * 1024, // 16 MB
            rows_per_page: 256,
            page_cache_capacity: 1024,
            tablet_id: 1,
            key_mode: KeyMode::BlobIds,
            channel_kinds: vec![
                ChannelKindEntry {
                    kind: ChannelKindId::Data,
                    channel_groups: vec![
                        ChannelGroup { channel: 2, group_id: 0 },
                        ChannelGroup { channel: 3, group_id: 0 },
                    ],
                },
                ChannelKindEntry {
                    kind: ChannelKindId::Log,
                    channel_groups: vec![ChannelGroup { channel: 1, group_id: 0 }],
                },
            ],
            decommit_group_id: None,
            max_message_size: 8 * 1024 * 1024, // 8 MB
            watchdog_period: Duration::from_secs(5),
            virtual_group_id: 0,
            low_watermark: 100,
            allocate_batch: 100,
            retry_policy: RetryPolicy::default(),
            listen_addr: "127.0.0.1:7480".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Group backing `channel`, if the channel is assigned to any kind
    pub fn group_for_channel(&self, channel: u8) -> Option<u32> {
        self.channel_kinds
            .iter()
            .flat_map(|entry| entry.channel_groups.iter())
            .find(|cg| cg.channel == channel)
            .map(|cg| cg.group_id)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn rows_per_page(mut self, rows: usize) -> Self {
        self.config.rows_per_page = rows.max(1);
        self
    }

    pub fn page_cache_capacity(mut self, pages: usize) -> Self {
        self.config.page_cache_capacity = pages.max(1);
        self
    }

    pub fn tablet_id(mut self, tablet_id: u64) -> Self {
        self.config.tablet_id = tablet_id;
        self
    }

    pub fn key_mode(mut self, mode: KeyMode) -> Self {
        self.config.key_mode = mode;
        self
    }

    /// Replace the channel-kind table
    pub fn channel_kinds(mut self, kinds: Vec<ChannelKindEntry>) -> Self {
        self.config.channel_kinds = kinds;
        self
    }

    pub fn decommit_group_id(mut self, group_id: Option<u32>) -> Self {
        self.config.decommit_group_id = group_id;
        self
    }

    /// Set the resolve response size bound (in bytes)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn watchdog_period(mut self, period: Duration) -> Self {
        self.config.watchdog_period = period;
        self
    }

    pub fn virtual_group_id(mut self, id: u32) -> Self {
        self.config.virtual_group_id = id;
        self
    }

    pub fn low_watermark(mut self, count: u64) -> Self {
        self.config.low_watermark = count;
        self
    }

    pub fn allocate_batch(mut self, count: u32) -> Self {
        self.config.allocate_batch = count;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
