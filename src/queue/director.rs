//! Queue Director
//!
//! Owns the mapping from cycles to segment stores for one queue directory.
//!
//! ## Responsibilities
//! - Discover segment files by parsing their names
//! - Open (or create) the store for a cycle on first use
//! - Share one open store per cycle between the appender and all tailers

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::Config;
use crate::cycle::ResourceNameCache;
use crate::error::Result;
use crate::store::SegmentStore;

/// Resolves cycles to open segment stores
///
/// ## Concurrency:
/// - `stores`: parking_lot Mutex; held while a store is opened so a cycle
///   is never mapped twice by one process
/// - Entries are weak: a store nobody uses is unmapped and reopened (with a
///   fresh index scan) on next use
pub struct QueueDirector {
    config: Config,
    names: ResourceNameCache,
    stores: Mutex<HashMap<i64, Weak<SegmentStore>>>,
}

impl QueueDirector {
    pub fn new(config: Config) -> Result<Self> {
        let names = ResourceNameCache::new(
            &config.roll_cycle,
            config.epoch,
            &config.data_dir,
            &config.file_extension,
        )?;
        Ok(Self {
            config,
            names,
            stores: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn names(&self) -> &ResourceNameCache {
        &self.names
    }

    /// The store for `cycle`
    ///
    /// Returns `Ok(None)` when the segment does not exist and `create` is
    /// false (always the case for read-only queues).
    pub fn store_for_cycle(&self, cycle: i64, create: bool) -> Result<Option<Arc<SegmentStore>>> {
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(&cycle).and_then(Weak::upgrade) {
            return Ok(Some(store));
        }
        stores.retain(|_, store| store.strong_count() > 0);

        let resource = self.names.resource_for(cycle)?;
        let create = create && !self.config.read_only;
        match SegmentStore::open(&resource.path, cycle, &self.config, create)? {
            Some(store) => {
                let store = Arc::new(store);
                stores.insert(cycle, Arc::downgrade(&store));
                Ok(Some(store))
            }
            None => Ok(None),
        }
    }

    /// Cycles with a segment file, ascending
    ///
    /// Files with the segment extension whose name does not parse are an
    /// error; anything else in the directory is ignored.
    pub fn cycles(&self) -> Result<Vec<i64>> {
        let entries = match fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut cycles = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches_extension = path
                .extension()
                .map(|ext| ext == self.config.file_extension.as_str())
                .unwrap_or(false);
            if matches_extension {
                cycles.push(self.names.cycle_for_path(&path)?);
            }
        }

        cycles.sort_unstable();
        Ok(cycles)
    }

    pub fn first_cycle(&self) -> Result<Option<i64>> {
        Ok(self.cycles()?.first().copied())
    }

    pub fn last_cycle(&self) -> Result<Option<i64>> {
        Ok(self.cycles()?.last().copied())
    }

    /// Smallest existing cycle after `cycle`
    pub fn next_cycle(&self, cycle: i64) -> Result<Option<i64>> {
        Ok(self.cycles()?.into_iter().find(|&c| c > cycle))
    }
}

impl std::fmt::Debug for QueueDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDirector")
            .field("dir", &self.config.data_dir)
            .field("open_stores", &self.stores.lock().len())
            .finish()
    }
}
