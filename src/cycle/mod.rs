//! Roll Cycle Module
//!
//! Maps wall-clock time to cycle numbers and packs `(cycle, sequence)` into
//! a 64-bit index.
//!
//! ## Index Layout
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ cycle (64 - sequence_bits)   │ sequence (sequence_bits) │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! ## Built-in Roll Cycles
//! ```text
//! name           format          length   seq bits  checkpoint interval
//! TEST_SECONDLY  %Y%m%d-%H%M%S   1 s      32        4
//! MINUTELY       %Y%m%d-%H%M     1 min    32        16
//! TEN_MINUTELY   %Y%m%d-%H%M     10 min   32        16
//! HOURLY         %Y%m%d-%H       1 h      32        16
//! LARGE_HOURLY   %Y%m%d-%H       1 h      36        64
//! DAILY          %Y%m%d          1 d      32        64
//! LARGE_DAILY    %Y%m%d          1 d      40        128
//! HUGE_DAILY     %Y%m%d          1 d      48        1024
//! TEST_HOURLY    %Y%m%d-%H       1 h      10        4
//! TEST_DAILY     %Y%m%d          1 d      6         1
//! TEST2_DAILY    %Y%m%d          1 d      9         2
//! TEST4_DAILY    %Y%m%d          1 d      12        4
//! ```
//! The widths and intervals are policy: [`RollCycle::custom`] builds any
//! other combination.

mod resource;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TideError};

pub use resource::{Resource, ResourceNameCache};

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
pub(crate) const DAY: i64 = 24 * HOUR;

/// Largest sequence width accepted; leaves room for realistic cycle counts
const MAX_SEQUENCE_BITS: u32 = 56;

/// Cycle length, file-name format and index bit layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCycle {
    name: Cow<'static, str>,
    format: Cow<'static, str>,
    length_ms: i64,
    sequence_bits: u32,
    delta_checkpoint_interval: u32,
}

impl RollCycle {
    pub const TEST_SECONDLY: RollCycle =
        RollCycle::builtin("TEST_SECONDLY", "%Y%m%d-%H%M%S", SECOND, 32, 4);
    pub const MINUTELY: RollCycle = RollCycle::builtin("MINUTELY", "%Y%m%d-%H%M", MINUTE, 32, 16);
    pub const TEN_MINUTELY: RollCycle =
        RollCycle::builtin("TEN_MINUTELY", "%Y%m%d-%H%M", 10 * MINUTE, 32, 16);
    pub const HOURLY: RollCycle = RollCycle::builtin("HOURLY", "%Y%m%d-%H", HOUR, 32, 16);
    pub const LARGE_HOURLY: RollCycle =
        RollCycle::builtin("LARGE_HOURLY", "%Y%m%d-%H", HOUR, 36, 64);
    pub const DAILY: RollCycle = RollCycle::builtin("DAILY", "%Y%m%d", DAY, 32, 64);
    pub const LARGE_DAILY: RollCycle = RollCycle::builtin("LARGE_DAILY", "%Y%m%d", DAY, 40, 128);
    pub const HUGE_DAILY: RollCycle = RollCycle::builtin("HUGE_DAILY", "%Y%m%d", DAY, 48, 1024);
    pub const TEST_HOURLY: RollCycle = RollCycle::builtin("TEST_HOURLY", "%Y%m%d-%H", HOUR, 10, 4);
    pub const TEST_DAILY: RollCycle = RollCycle::builtin("TEST_DAILY", "%Y%m%d", DAY, 6, 1);
    pub const TEST2_DAILY: RollCycle = RollCycle::builtin("TEST2_DAILY", "%Y%m%d", DAY, 9, 2);
    pub const TEST4_DAILY: RollCycle = RollCycle::builtin("TEST4_DAILY", "%Y%m%d", DAY, 12, 4);

    /// Every built-in roll cycle
    pub const ALL: [RollCycle; 12] = [
        Self::TEST_SECONDLY,
        Self::MINUTELY,
        Self::TEN_MINUTELY,
        Self::HOURLY,
        Self::LARGE_HOURLY,
        Self::DAILY,
        Self::LARGE_DAILY,
        Self::HUGE_DAILY,
        Self::TEST_HOURLY,
        Self::TEST_DAILY,
        Self::TEST2_DAILY,
        Self::TEST4_DAILY,
    ];

    const fn builtin(
        name: &'static str,
        format: &'static str,
        length_ms: i64,
        sequence_bits: u32,
        delta_checkpoint_interval: u32,
    ) -> Self {
        Self {
            name: Cow::Borrowed(name),
            format: Cow::Borrowed(format),
            length_ms,
            sequence_bits,
            delta_checkpoint_interval,
        }
    }

    /// Build a roll cycle outside the built-in table
    ///
    /// The format is a chrono strftime pattern and must name the year, month
    /// and day (`%Y`, `%m`, `%d`) so file names stay unique.
    pub fn custom(
        name: impl Into<String>,
        format: impl Into<String>,
        length_ms: i64,
        sequence_bits: u32,
        delta_checkpoint_interval: u32,
    ) -> Result<Self> {
        let format = format.into();
        if length_ms <= 0 {
            return Err(TideError::Config(format!(
                "roll cycle length must be positive, got {}",
                length_ms
            )));
        }
        if sequence_bits == 0 || sequence_bits > MAX_SEQUENCE_BITS {
            return Err(TideError::Config(format!(
                "sequence bits must be in 1..={}, got {}",
                MAX_SEQUENCE_BITS, sequence_bits
            )));
        }
        if delta_checkpoint_interval == 0 {
            return Err(TideError::Config(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }
        for field in ["%Y", "%m", "%d"] {
            if !format.contains(field) {
                return Err(TideError::Config(format!(
                    "roll cycle format {:?} is missing {}",
                    format, field
                )));
            }
        }

        Ok(Self {
            name: Cow::Owned(name.into()),
            format: Cow::Owned(format),
            length_ms,
            sequence_bits,
            delta_checkpoint_interval,
        })
    }

    /// Look up a built-in roll cycle by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<RollCycle> {
        Self::ALL
            .iter()
            .find(|rc| rc.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// strftime pattern used for segment file names
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Cycle length in milliseconds
    pub fn length_ms(&self) -> i64 {
        self.length_ms
    }

    pub fn sequence_bits(&self) -> u32 {
        self.sequence_bits
    }

    /// Default number of records between coarse checkpoints
    pub fn delta_checkpoint_interval(&self) -> u32 {
        self.delta_checkpoint_interval
    }

    /// Largest sequence number a cycle can hold
    pub fn max_sequence(&self) -> u64 {
        (1u64 << self.sequence_bits) - 1
    }

    /// Largest cycle number an index can carry
    pub fn max_cycle(&self) -> i64 {
        ((1u64 << (63 - self.sequence_bits)) - 1) as i64
    }

    /// Cycle containing `now_millis`: `floor((now - epoch) / length)`
    pub fn current(&self, now_millis: i64, epoch: i64) -> i64 {
        (now_millis - epoch).div_euclid(self.length_ms)
    }

    /// Pack a cycle and sequence into an index
    pub fn to_index(&self, cycle: i64, sequence: u64) -> Result<u64> {
        if sequence > self.max_sequence() {
            return Err(TideError::SequenceOverflow {
                cycle,
                sequence,
                max: self.max_sequence(),
            });
        }
        if cycle < 0 || cycle > self.max_cycle() {
            return Err(TideError::CycleOutOfRange { cycle });
        }
        Ok(((cycle as u64) << self.sequence_bits) | sequence)
    }

    pub fn to_cycle(&self, index: u64) -> i64 {
        (index >> self.sequence_bits) as i64
    }

    pub fn to_sequence(&self, index: u64) -> u64 {
        index & self.max_sequence()
    }
}

impl Default for RollCycle {
    fn default() -> Self {
        Self::DAILY
    }
}
