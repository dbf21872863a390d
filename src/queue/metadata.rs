//! Queue metadata
//!
//! The queue-wide settings every segment must agree on, persisted once in
//! `queue.meta` so later opens (and other processes) cannot silently read the
//! directory with a different roll cycle or epoch.
//!
//! ## File Format
//! ```text
//! [crc32: 4 bytes][bincode(QueueMetadata)]
//! ```

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::cycle::RollCycle;
use crate::error::{Result, TideError};

pub const METADATA_FILE: &str = "queue.meta";

const METADATA_VERSION: u32 = 1;

/// Persisted queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    pub version: u32,
    pub roll_cycle: RollCycle,
    pub epoch: i64,
    pub source_id: u32,
}

impl QueueMetadata {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version: METADATA_VERSION,
            roll_cycle: config.roll_cycle.clone(),
            epoch: config.epoch,
            source_id: config.source_id,
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// Read the metadata of the queue in `dir`, if it has any
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 4 {
            return Err(TideError::Metadata(format!(
                "{:?} is truncated ({} bytes)",
                path,
                bytes.len()
            )));
        }
        let (crc, body) = bytes.split_at(4);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32fast::hash(body);
        if stored != actual {
            return Err(TideError::Metadata(format!(
                "{:?} checksum mismatch: stored {:#010x}, computed {:#010x}",
                path, stored, actual
            )));
        }

        let metadata: QueueMetadata = bincode::deserialize(body)?;
        if metadata.version != METADATA_VERSION {
            return Err(TideError::Metadata(format!(
                "unsupported metadata version {}",
                metadata.version
            )));
        }
        Ok(Some(metadata))
    }

    /// Write atomically: temp file, fsync, rename
    pub fn store(&self, dir: &Path) -> Result<()> {
        let body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);

        let tmp = dir.join(format!("{}.tmp.{}", METADATA_FILE, std::process::id()));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&crc.to_le_bytes())?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, Self::path(dir))?;
        Ok(())
    }

    /// Load the queue's metadata, writing it from `config` on first use
    ///
    /// A read-only open of a queue without metadata gets the config's view
    /// and writes nothing.
    pub fn open_or_create(config: &Config) -> Result<Self> {
        match Self::load(&config.data_dir)? {
            Some(existing) => {
                existing.validate(config)?;
                Ok(existing)
            }
            None if config.read_only => Ok(Self::from_config(config)),
            None => {
                let metadata = Self::from_config(config);
                metadata.store(&config.data_dir)?;
                debug!(dir = ?config.data_dir, roll_cycle = metadata.roll_cycle.name(), "Wrote queue metadata");
                Ok(metadata)
            }
        }
    }

    /// Fail if `config` disagrees with what the queue was created with
    pub fn validate(&self, config: &Config) -> Result<()> {
        let ours = &self.roll_cycle;
        let theirs = &config.roll_cycle;
        if ours.length_ms() != theirs.length_ms()
            || ours.format() != theirs.format()
            || ours.sequence_bits() != theirs.sequence_bits()
        {
            return Err(TideError::Metadata(format!(
                "queue uses roll cycle {} ({} ms, {:?}, {} bits), config asks for {} ({} ms, {:?}, {} bits)",
                ours.name(),
                ours.length_ms(),
                ours.format(),
                ours.sequence_bits(),
                theirs.name(),
                theirs.length_ms(),
                theirs.format(),
                theirs.sequence_bits()
            )));
        }
        if self.epoch != config.epoch {
            return Err(TideError::Metadata(format!(
                "queue uses epoch {}, config asks for {}",
                self.epoch, config.epoch
            )));
        }
        Ok(())
    }

    /// A config for this queue with everything else at its default
    pub fn to_config(&self, dir: impl Into<PathBuf>) -> Config {
        Config::builder()
            .data_dir(dir)
            .roll_cycle(self.roll_cycle.clone())
            .epoch(self.epoch)
            .source_id(self.source_id)
            .build()
    }
}
