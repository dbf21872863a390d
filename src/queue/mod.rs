//! Queue Module
//!
//! The user-facing handle: one directory of cycle segments, with appenders
//! writing at the end and tailers reading anywhere.
//!
//! ## Architecture
//! ```text
//!   Appender ─┐                 ┌─ Tailer
//!             ▼                 ▼
//!         ┌───────────────────────────┐
//!         │      QueueDirector        │  cycle -> Arc<SegmentStore>
//!         │  (ResourceNameCache)      │  cycle <-> file name
//!         └─────────────┬─────────────┘
//!                       ▼
//!   20180413.tlog  20180414.tlog  ...   queue.meta
//! ```

mod appender;
mod director;
mod metadata;
mod tailer;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::cycle::RollCycle;
use crate::error::{Result, TideError};
use crate::store::SegmentStore;

pub use appender::{Appender, WriteDocument};
pub use director::QueueDirector;
pub use metadata::{QueueMetadata, METADATA_FILE};
pub use tailer::{ReadDocument, Tailer};

/// A persistent, memory-mapped message queue
#[derive(Debug)]
pub struct Queue {
    config: Config,
    metadata: QueueMetadata,
    director: Arc<QueueDirector>,
}

impl Queue {
    /// Open or create the queue described by `config`
    ///
    /// The first writable open records the roll cycle and epoch in
    /// `queue.meta`; later opens must agree with it.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        if !config.read_only {
            fs::create_dir_all(&config.data_dir)?;
        }

        let metadata = QueueMetadata::open_or_create(&config)?;
        let director = Arc::new(QueueDirector::new(config.clone())?);

        info!(
            dir = ?config.data_dir,
            roll_cycle = config.roll_cycle.name(),
            epoch = config.epoch,
            read_only = config.read_only,
            "Opened queue"
        );

        Ok(Self {
            config,
            metadata,
            director,
        })
    }

    /// Open an existing queue with the settings stored in its metadata
    pub fn open_existing(dir: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let metadata = QueueMetadata::load(dir)?.ok_or_else(|| {
            TideError::Metadata(format!("no {} in {:?}", METADATA_FILE, dir))
        })?;
        let mut config = metadata.to_config(dir);
        config.read_only = read_only;
        Self::open(config)
    }

    /// An appender for this queue
    pub fn acquire_appender(&self) -> Result<Appender> {
        if self.config.read_only {
            return Err(TideError::ReadOnly);
        }
        Ok(Appender::new(Arc::clone(&self.director), &self.config))
    }

    /// A tailer positioned before the first record
    pub fn create_tailer(&self) -> Tailer {
        Tailer::new(Arc::clone(&self.director))
    }

    pub fn first_cycle(&self) -> Result<Option<i64>> {
        self.director.first_cycle()
    }

    pub fn last_cycle(&self) -> Result<Option<i64>> {
        self.director.last_cycle()
    }

    /// Cycles with a segment file, ascending
    pub fn cycles(&self) -> Result<Vec<i64>> {
        self.director.cycles()
    }

    /// Cycle the configured clock is in now
    pub fn cycle(&self) -> i64 {
        let now = self.config.time_provider.current_time_millis();
        self.config.roll_cycle.current(now, self.config.epoch)
    }

    pub fn store_for_cycle(&self, cycle: i64, create: bool) -> Result<Option<Arc<SegmentStore>>> {
        self.director.store_for_cycle(cycle, create)
    }

    pub fn roll_cycle(&self) -> &RollCycle {
        &self.config.roll_cycle
    }

    pub fn epoch(&self) -> i64 {
        self.config.epoch
    }

    pub fn path(&self) -> &Path {
        &self.config.data_dir
    }

    /// Path of the segment file for `cycle`, whether or not it exists
    pub fn segment_path(&self, cycle: i64) -> Result<PathBuf> {
        Ok(self.director.names().resource_for(cycle)?.path.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metadata(&self) -> &QueueMetadata {
        &self.metadata
    }
}
