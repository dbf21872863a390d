//! Segment header
//!
//! The first 128 bytes of every segment file. The state word at offset 0 is
//! the only synchronisation point for initialisation: whoever moves it from
//! Uninitialized to Building writes the immutable fields, then publishes
//! Built with release ordering. Everyone else waits for Built and validates.

use std::path::Path;
use std::sync::atomic::Ordering;

use crate::error::{Result, TideError};

use super::mapped::MappedFile;

// =============================================================================
// Layout
// =============================================================================

pub(crate) const STATE_OFFSET: u64 = 0;
const VERSION_OFFSET: u64 = 4;
const MAGIC_OFFSET: u64 = 8;
const EPOCH_OFFSET: u64 = 16;
const CYCLE_OFFSET: u64 = 24;
const CAPACITY_OFFSET: u64 = 32;
const SOURCE_ID_OFFSET: u64 = 40;
const INTERVAL_OFFSET: u64 = 44;
const SEQUENCE_BITS_OFFSET: u64 = 48;
const CHECKSUM_OFFSET: u64 = 52;
pub(crate) const WRITE_POSITION_OFFSET: u64 = 56;
pub(crate) const LAST_REPLICATED_OFFSET: u64 = 64;
pub(crate) const LAST_ACKED_OFFSET: u64 = 72;
pub(crate) const EOF_POSITION_OFFSET: u64 = 80;
/// Bytes of the file known to exist; only raised, by the tail writer
pub(crate) const ALLOCATED_OFFSET: u64 = 88;

/// Bytes covered by the checksum: version through sequence bits
const CHECKSUMMED: std::ops::Range<usize> = 4..52;

/// Header size; the first record starts here
pub const HEADER_SIZE: u64 = 128;

pub(crate) const MAGIC: &[u8; 8] = b"TIDELOG\0";
pub(crate) const VERSION: u32 = 1;

/// Stored in the replication counters while nothing has been replicated
pub(crate) const UNSET: u64 = u64::MAX;

// =============================================================================
// State Machine
// =============================================================================

pub(crate) const UNINITIALIZED: u32 = 0;
pub(crate) const BUILDING: u32 = 1;
pub(crate) const BUILT: u32 = 2;

/// Header state as seen in the state word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Uninitialized,
    Building,
    Built,
    Unknown(u32),
}

impl HeaderState {
    pub(crate) fn from_word(word: u32) -> Self {
        match word {
            UNINITIALIZED => HeaderState::Uninitialized,
            BUILDING => HeaderState::Building,
            BUILT => HeaderState::Built,
            other => HeaderState::Unknown(other),
        }
    }
}

/// Immutable header fields, fixed when the segment is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFields {
    pub version: u32,
    pub epoch: i64,
    pub cycle: i64,
    pub capacity: u64,
    pub source_id: u32,
    pub delta_checkpoint_interval: u32,
    pub sequence_bits: u32,
}

impl HeaderFields {
    fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        put(&mut buf, VERSION_OFFSET, &self.version.to_le_bytes());
        put(&mut buf, MAGIC_OFFSET, MAGIC);
        put(&mut buf, EPOCH_OFFSET, &self.epoch.to_le_bytes());
        put(&mut buf, CYCLE_OFFSET, &self.cycle.to_le_bytes());
        put(&mut buf, CAPACITY_OFFSET, &self.capacity.to_le_bytes());
        put(&mut buf, SOURCE_ID_OFFSET, &self.source_id.to_le_bytes());
        put(
            &mut buf,
            INTERVAL_OFFSET,
            &self.delta_checkpoint_interval.to_le_bytes(),
        );
        put(&mut buf, SEQUENCE_BITS_OFFSET, &self.sequence_bits.to_le_bytes());

        let crc = crc32fast::hash(&buf[CHECKSUMMED]);
        put(&mut buf, CHECKSUM_OFFSET, &crc.to_le_bytes());
        buf
    }

    fn decode(path: &Path, buf: &[u8]) -> Result<Self> {
        let invalid = |reason: String| TideError::InvalidHeader {
            path: path.to_path_buf(),
            reason,
        };

        if &buf[MAGIC_OFFSET as usize..MAGIC_OFFSET as usize + 8] != MAGIC {
            return Err(invalid(format!(
                "bad magic {:?}",
                &buf[MAGIC_OFFSET as usize..MAGIC_OFFSET as usize + 8]
            )));
        }

        let stored_crc = read_u32(buf, CHECKSUM_OFFSET);
        let actual_crc = crc32fast::hash(&buf[CHECKSUMMED]);
        if stored_crc != actual_crc {
            return Err(invalid(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let version = read_u32(buf, VERSION_OFFSET);
        if version != VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }

        Ok(Self {
            version,
            epoch: read_u64(buf, EPOCH_OFFSET) as i64,
            cycle: read_u64(buf, CYCLE_OFFSET) as i64,
            capacity: read_u64(buf, CAPACITY_OFFSET),
            source_id: read_u32(buf, SOURCE_ID_OFFSET),
            delta_checkpoint_interval: read_u32(buf, INTERVAL_OFFSET),
            sequence_bits: read_u32(buf, SEQUENCE_BITS_OFFSET),
        })
    }
}

/// Write the immutable fields and reset the mutable words
///
/// `allocated` is the file length the builder created.
///
/// # Safety
/// The caller must hold the header in the Building state.
pub(crate) unsafe fn write_fields(
    map: &MappedFile,
    fields: &HeaderFields,
    allocated: u64,
) -> Result<()> {
    let buf = fields.encode();
    // Everything after the state word; the state word is owned by the CAS.
    map.write_at(VERSION_OFFSET, &buf[VERSION_OFFSET as usize..WRITE_POSITION_OFFSET as usize])?;

    map.atomic_u64(WRITE_POSITION_OFFSET)?.store(0, Ordering::Relaxed);
    map.atomic_u64(LAST_REPLICATED_OFFSET)?.store(UNSET, Ordering::Relaxed);
    map.atomic_u64(LAST_ACKED_OFFSET)?.store(UNSET, Ordering::Relaxed);
    map.atomic_u64(EOF_POSITION_OFFSET)?.store(0, Ordering::Relaxed);
    map.atomic_u64(ALLOCATED_OFFSET)?.store(allocated, Ordering::Relaxed);
    Ok(())
}

/// Read and validate the immutable fields of a Built header
pub(crate) fn read_fields(map: &MappedFile) -> Result<HeaderFields> {
    let buf = map.bytes(0, HEADER_SIZE as usize)?;
    HeaderFields::decode(map.path(), buf)
}

fn put(buf: &mut [u8], offset: u64, bytes: &[u8]) {
    let start = offset as usize;
    buf[start..start + bytes.len()].copy_from_slice(bytes);
}

fn read_u32(buf: &[u8], offset: u64) -> u32 {
    let start = offset as usize;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[start..start + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(buf: &[u8], offset: u64) -> u64 {
    let start = offset as usize;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[start..start + 8]);
    u64::from_le_bytes(raw)
}
