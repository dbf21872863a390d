//! Resource-name cache
//!
//! Bidirectional mapping between a cycle number and its segment file name.
//! Names are the UTC rendering of the cycle's start under the roll cycle's
//! format, counted from midnight of the epoch's day:
//!
//! ```text
//! name(cycle) = format(day_start(epoch) + cycle * length)
//! day_start(epoch) = epoch - epoch mod 1 day   (floor, so -3h -> 1969-12-31)
//! ```
//!
//! The appender and the tailer ask for the current cycle's name on every
//! roll check, so the last two lookups are memoized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;

use crate::error::{Result, TideError};

use super::{RollCycle, DAY};

/// A cycle's file name and full path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub cycle: i64,
    /// File name without extension
    pub text: String,
    pub path: PathBuf,
}

/// Maps cycles to segment files and back
#[derive(Debug)]
pub struct ResourceNameCache {
    dir: PathBuf,
    extension: String,
    format: String,
    length_ms: i64,
    /// Midnight (UTC) of the day the epoch falls in
    day_start: i64,
    /// Most recent first
    recent: Mutex<[Option<Arc<Resource>>; 2]>,
}

impl ResourceNameCache {
    pub fn new(
        roll_cycle: &RollCycle,
        epoch: i64,
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Result<Self> {
        let format = roll_cycle.format().to_string();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(TideError::Config(format!(
                "invalid file name format {:?}",
                format
            )));
        }

        Ok(Self {
            dir: dir.into(),
            extension: extension.into(),
            format,
            length_ms: roll_cycle.length_ms(),
            day_start: epoch - epoch.rem_euclid(DAY),
            recent: Mutex::new([None, None]),
        })
    }

    /// File name and path for a cycle
    pub fn resource_for(&self, cycle: i64) -> Result<Arc<Resource>> {
        {
            let recent = self.recent.lock();
            for resource in recent.iter().flatten() {
                if resource.cycle == cycle {
                    return Ok(Arc::clone(resource));
                }
            }
        }

        let text = self.format_cycle(cycle)?;
        let path = self.dir.join(format!("{}.{}", text, self.extension));
        let resource = Arc::new(Resource { cycle, text, path });

        let mut recent = self.recent.lock();
        recent[1] = recent[0].take();
        recent[0] = Some(Arc::clone(&resource));

        Ok(resource)
    }

    /// Inverse of `resource_for(..).text`
    ///
    /// Anything that does not format back to exactly `text` is rejected: a
    /// mismatched name means the directory was tampered with or the queue
    /// is being read with the wrong roll cycle.
    pub fn parse_count(&self, text: &str) -> Result<i64> {
        let millis = self.parse_millis(text)?;
        let delta = millis - self.day_start;

        if delta.rem_euclid(self.length_ms) != 0 {
            return Err(TideError::ResourceName {
                name: text.to_string(),
                reason: format!("not aligned to a {} ms cycle", self.length_ms),
            });
        }
        let cycle = delta.div_euclid(self.length_ms);

        if self.format_cycle(cycle)? != text {
            return Err(TideError::ResourceName {
                name: text.to_string(),
                reason: format!("does not round-trip through {:?}", self.format),
            });
        }

        Ok(cycle)
    }

    /// Cycle of a segment file path (the stem must parse)
    pub fn cycle_for_path(&self, path: &Path) -> Result<i64> {
        self.parse_count(&Self::stem(path)?)
    }

    /// Number of cycle lengths between the Unix epoch and the file's name,
    /// independent of the configured epoch
    pub fn to_long(&self, path: &Path) -> Result<i64> {
        let millis = self.parse_millis(&Self::stem(path)?)?;
        Ok(millis.div_euclid(self.length_ms))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn format_cycle(&self, cycle: i64) -> Result<String> {
        let millis = cycle
            .checked_mul(self.length_ms)
            .and_then(|offset| offset.checked_add(self.day_start))
            .ok_or(TideError::CycleOutOfRange { cycle })?;

        let start = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(TideError::CycleOutOfRange { cycle })?;

        Ok(start.format(&self.format).to_string())
    }

    /// Parse a name into millis since the Unix epoch; hour and minute
    /// default to zero when the format has none
    fn parse_millis(&self, text: &str) -> Result<i64> {
        let mut full_text = text.to_string();
        let mut full_format = self.format.clone();
        if !self.format.contains("%H") {
            full_text.push_str("T00");
            full_format.push_str("T%H");
        }
        if !self.format.contains("%M") {
            full_text.push_str(":00");
            full_format.push_str(":%M");
        }

        let parsed = NaiveDateTime::parse_from_str(&full_text, &full_format).map_err(|e| {
            TideError::ResourceName {
                name: text.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(parsed.and_utc().timestamp_millis())
    }

    fn stem(path: &Path) -> Result<String> {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| TideError::ResourceName {
                name: path.display().to_string(),
                reason: "no file name".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_keeps_two_most_recent() {
        let cache = ResourceNameCache::new(&RollCycle::DAILY, 0, "/q", "tlog").unwrap();

        let a = cache.resource_for(1).unwrap();
        let b = cache.resource_for(2).unwrap();
        assert!(Arc::ptr_eq(&a, &cache.resource_for(1).unwrap()));
        assert!(Arc::ptr_eq(&b, &cache.resource_for(2).unwrap()));

        cache.resource_for(3).unwrap();
        cache.resource_for(4).unwrap();
        assert!(!Arc::ptr_eq(&a, &cache.resource_for(1).unwrap()));
    }

    #[test]
    fn test_path_uses_directory_and_extension() {
        let cache = ResourceNameCache::new(&RollCycle::DAILY, 0, "/q", "tlog").unwrap();
        let resource = cache.resource_for(0).unwrap();
        assert_eq!(resource.text, "19700101");
        assert_eq!(resource.path, PathBuf::from("/q/19700101.tlog"));
    }
}
