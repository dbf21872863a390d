//! Configuration for tidelog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cycle::RollCycle;
use crate::error::{Result, TideError};
use crate::store::HEADER_SIZE;
use crate::time::{SystemTimeProvider, TimeProvider};

/// Default hard maximum of one segment file
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Default step by which a segment file grows
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Segment maximum used by `ConfigBuilder::test_block_size`
pub const TEST_SEGMENT_SIZE: u64 = 256 * 1024;

/// Growth step used by `ConfigBuilder::test_block_size`
pub const TEST_CHUNK_SIZE: u64 = 16 * 1024;

/// Smallest segment: the header plus one record header word
const MIN_SEGMENT_SIZE: u64 = HEADER_SIZE + 4;

/// Main configuration for a queue instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the queue
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── queue.meta              (roll cycle, epoch, source id)
    ///     └── {resource name}.tlog    (one segment per cycle)
    pub data_dir: PathBuf,

    /// Extension of segment files, without the dot
    pub file_extension: String,

    /// Hard maximum of each segment file in bytes; a full segment
    /// rejects writes with `SegmentFull`
    pub segment_size: u64,

    /// Segment files start at this size and grow by it as records arrive
    pub chunk_size: u64,

    /// Open without creating files or appenders
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Roll Cycle Configuration
    // -------------------------------------------------------------------------
    /// Cycle length, file naming and index bit layout
    pub roll_cycle: RollCycle,

    /// Offset (millis since the Unix epoch) at which cycle 0 starts
    pub epoch: i64,

    /// Overrides the roll cycle's checkpoint interval
    pub delta_checkpoint_interval: Option<u32>,

    /// Identifier of this queue's origin when replicated
    pub source_id: u32,

    // -------------------------------------------------------------------------
    // Write Path Configuration
    // -------------------------------------------------------------------------
    /// How often the appender msyncs
    pub sync_strategy: SyncStrategy,

    /// Bound for every wait on a busy record or a header being built
    pub timeout_ms: u64,

    /// Source of "now" for roll decisions
    pub time_provider: Arc<dyn TimeProvider>,
}

/// Appender sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Leave write-back to the OS page cache
    OsManaged,

    /// msync each record after publishing it (safest, slowest)
    EveryWrite,

    /// msync after N published records
    EveryNWrites { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tidelog_data"),
            file_extension: "tlog".to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_only: false,
            roll_cycle: RollCycle::DAILY,
            epoch: 0,
            delta_checkpoint_interval: None,
            source_id: 0,
            sync_strategy: SyncStrategy::OsManaged,
            timeout_ms: 10_000,
            time_provider: Arc::new(SystemTimeProvider),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Checkpoint interval in effect (override or roll cycle default)
    pub fn effective_checkpoint_interval(&self) -> u32 {
        self.delta_checkpoint_interval
            .unwrap_or_else(|| self.roll_cycle.delta_checkpoint_interval())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject settings no segment could be built with
    ///
    /// Runs before any file is touched, so a bad config never leaves a
    /// half-usable segment behind.
    pub fn validate(&self) -> Result<()> {
        if self.effective_checkpoint_interval() == 0 {
            return Err(TideError::Config(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(TideError::Config(format!(
                "segment size {} is below the minimum of {} bytes",
                self.segment_size, MIN_SEGMENT_SIZE
            )));
        }
        if self.chunk_size == 0 {
            return Err(TideError::Config("chunk size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the queue directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the roll cycle
    pub fn roll_cycle(mut self, roll_cycle: RollCycle) -> Self {
        self.config.roll_cycle = roll_cycle;
        self
    }

    /// Set the epoch (millis since the Unix epoch)
    pub fn epoch(mut self, epoch: i64) -> Self {
        self.config.epoch = epoch;
        self
    }

    /// Set the source id used by replication
    pub fn source_id(mut self, source_id: u32) -> Self {
        self.config.source_id = source_id;
        self
    }

    /// Set the segment hard maximum (in bytes)
    pub fn segment_size(mut self, size: u64) -> Self {
        self.config.segment_size = size;
        self
    }

    /// Set the step segment files grow by (in bytes)
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Small segments and growth steps for tests
    pub fn test_block_size(mut self) -> Self {
        self.config.segment_size = TEST_SEGMENT_SIZE;
        self.config.chunk_size = TEST_CHUNK_SIZE;
        self
    }

    /// Override the roll cycle's checkpoint interval
    pub fn delta_checkpoint_interval(mut self, interval: u32) -> Self {
        self.config.delta_checkpoint_interval = Some(interval);
        self
    }

    /// Set the appender sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the wait bound (in milliseconds)
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Set the segment file extension
    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.file_extension = extension.into();
        self
    }

    /// Set the clock used for roll decisions
    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.config.time_provider = provider;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
        Config::builder().test_block_size().build().validate().unwrap();
    }

    #[test]
    fn test_zero_checkpoint_interval_is_rejected() {
        let config = Config::builder().delta_checkpoint_interval(0).build();
        assert!(matches!(config.validate(), Err(TideError::Config(_))));
    }

    #[test]
    fn test_tiny_segment_is_rejected() {
        let config = Config::builder().segment_size(HEADER_SIZE).build();
        assert!(matches!(config.validate(), Err(TideError::Config(_))));

        let config = Config::builder().chunk_size(0).build();
        assert!(matches!(config.validate(), Err(TideError::Config(_))));
    }
}
