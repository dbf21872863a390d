//! Segment Store
//!
//! One memory-mapped file holding every record of one cycle.
//!
//! ## Responsibilities
//! - Create the file, run the header state machine and grow the file in
//!   chunks up to its hard maximum
//! - Reserve, fill and publish records for appenders (CAS on the header word)
//! - Answer index lookups by scanning forward from the closest checkpoint
//! - Terminate the segment with an EOF marker when the queue rolls
//! - Hold the replication counters

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::cycle::RollCycle;
use crate::error::{Result, TideError};

use super::header::{
    self, HeaderFields, HeaderState, ALLOCATED_OFFSET, BUILDING, BUILT, EOF_POSITION_OFFSET,
    HEADER_SIZE, LAST_ACKED_OFFSET, LAST_REPLICATED_OFFSET, STATE_OFFSET, UNINITIALIZED, UNSET,
    WRITE_POSITION_OFFSET,
};
use super::index::{Checkpoint, CoarseIndex};
use super::mapped::MappedFile;
use super::record::{
    self, RecordState, BUSY, CHECKPOINT_LEN, END_OF_FILE, MAX_PAYLOAD_LEN, NOT_WRITTEN,
    RECORD_HEADER_SIZE,
};
use super::wait::wait_for;
use super::{IndexLookup, ReplicationCounters, ScanResult, WriteCursor};

/// Offset of the first record
pub const DATA_START: u64 = HEADER_SIZE;

/// Smallest usable capacity: the header plus room for an EOF marker
const MIN_CAPACITY: u64 = HEADER_SIZE + RECORD_HEADER_SIZE;

/// A record as seen by a forward scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Data { len: u32, next: u64 },
    /// Checkpoint (already learned) or padding
    Skip { next: u64 },
    NotWritten,
    /// Only returned when the scan does not wait
    Busy,
    EndOfFile,
}

/// Where a scan to the end of the readable records stopped
#[derive(Debug, Clone, Copy)]
struct End {
    position: u64,
    sequence: u64,
}

/// Memory-mapped storage for one cycle
///
/// ## Concurrency:
/// - Cross-process state lives in the mapped header and record words and is
///   only touched through atomics
/// - `index`: parking_lot RwLock inside `CoarseIndex`, local to this process
/// - The file only grows while its tail record is busy, by the writer
///   holding that record
/// - All methods use `&self`
#[derive(Debug)]
pub struct SegmentStore {
    map: MappedFile,
    /// Immutable header fields, validated at open
    fields: HeaderFields,
    roll_cycle: RollCycle,
    index: CoarseIndex,
    timeout: Duration,
    chunk_size: u64,
    read_only: bool,
    built_here: bool,
}

impl SegmentStore {
    /// Open the segment for `cycle` at `path`
    ///
    /// With `create` a missing file is created at one chunk; exactly one
    /// caller creates it and the one that wins the header CAS builds the
    /// header. Without `create` a missing file is `Ok(None)` and an unbuilt
    /// header is waited for, never built. Read-only configs open the file
    /// without write access.
    pub fn open(path: &Path, cycle: i64, config: &Config, create: bool) -> Result<Option<Self>> {
        config.validate()?;
        let create = create && !config.read_only;

        let file = match Self::open_file(path, config, create)? {
            Some(file) => file,
            None => return Ok(None),
        };
        wait_for(
            config.timeout(),
            || format!("{:?} to reach header size", path),
            || Ok((fs::metadata(path)?.len() >= MIN_CAPACITY).then_some(())),
        )?;

        // Reserve address space for the whole segment up front; the file
        // grows underneath without remapping.
        let file_len = file.metadata()?.len();
        let map = MappedFile::map(
            path,
            file,
            config.segment_size.max(file_len),
            !config.read_only,
        )?;
        let built_here = Self::init_header(&map, cycle, config, create)?;

        let fields = header::read_fields(&map)?;
        Self::validate(map.path(), &fields, cycle, &config.roll_cycle)?;
        // Another process may have built it with a different maximum
        let map = if fields.capacity != map.len() as u64 {
            map.remap(fields.capacity)?
        } else {
            map
        };

        let store = Self {
            map,
            fields,
            roll_cycle: config.roll_cycle.clone(),
            index: CoarseIndex::new(DATA_START),
            timeout: config.timeout(),
            chunk_size: config.chunk_size,
            read_only: config.read_only,
            built_here,
        };

        if built_here {
            debug!(
                cycle,
                path = ?path,
                capacity = fields.capacity,
                allocated = store.allocated(),
                "Created segment"
            );
        } else {
            let checkpoints = store.init_index()?;
            debug!(cycle, path = ?path, checkpoints, "Opened existing segment");
        }

        Ok(Some(store))
    }

    /// `create_new` picks the single caller that sizes a new file; everyone
    /// else opens whatever is there
    fn open_file(path: &Path, config: &Config, create: bool) -> Result<Option<File>> {
        if create {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(file) => {
                    let initial = config.chunk_size.min(config.segment_size).max(MIN_CAPACITY);
                    file.set_len(initial)?;
                    return Ok(Some(file));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        match OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .open(path)
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if !create && e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        self.map.path()
    }

    pub fn cycle(&self) -> i64 {
        self.fields.cycle
    }

    pub fn epoch(&self) -> i64 {
        self.fields.epoch
    }

    pub fn source_id(&self) -> u32 {
        self.fields.source_id
    }

    /// Records between coarse checkpoints, as stored in the header
    pub fn delta_checkpoint_interval(&self) -> u32 {
        self.fields.delta_checkpoint_interval
    }

    /// Hard maximum size of the file in bytes
    pub fn capacity(&self) -> u64 {
        self.fields.capacity
    }

    /// Bytes of the file allocated so far; grows in chunks up to `capacity`
    pub fn allocated(&self) -> u64 {
        self.header_counter(ALLOCATED_OFFSET)
            .load(Ordering::Acquire)
            .min(self.fields.capacity)
    }

    /// True if this open created the header
    pub fn built_here(&self) -> bool {
        self.built_here
    }

    pub fn roll_cycle(&self) -> &RollCycle {
        &self.roll_cycle
    }

    pub fn header(&self) -> &HeaderFields {
        &self.fields
    }

    pub fn header_state(&self) -> HeaderState {
        HeaderState::from_word(self.state_word().load(Ordering::Acquire))
    }

    /// msync the whole segment
    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }

    /// Every record from the start of the segment, without waiting
    pub fn records(&self) -> Records<'_> {
        Records {
            store: self,
            position: DATA_START,
            sequence: 0,
            done: false,
        }
    }

    // =========================================================================
    // Appender Support
    // =========================================================================

    /// Claim the next free record at or after `from`, leaving it busy
    ///
    /// Ready records are skipped (data ones advance the sequence), busy ones
    /// are waited for. When the claimed sequence is due a checkpoint and none
    /// exists yet, the checkpoint is published in the claimed slot first and
    /// the claim moves on to the following slot. Room is checked before the
    /// claim, so a failed reservation never leaves a busy record behind.
    pub(crate) fn reserve(&self, from: Checkpoint, size_hint: u32) -> Result<Checkpoint> {
        if self.read_only {
            return Err(TideError::ReadOnly);
        }
        let max = self.roll_cycle.max_sequence();
        let mut position = from.position;
        let mut sequence = from.sequence;

        loop {
            if sequence > max {
                return Err(TideError::SequenceOverflow {
                    cycle: self.cycle(),
                    sequence,
                    max,
                });
            }

            let needs_checkpoint = self.needs_checkpoint(sequence);
            let mut needed = record::record_size(size_hint);
            if needs_checkpoint {
                needed += record::record_size(CHECKPOINT_LEN);
            }
            if position + needed > self.limit() {
                return Err(self.full(position, needed));
            }

            match self.slot_at(position, sequence, true)? {
                Slot::Data { next, .. } => {
                    sequence += 1;
                    position = next;
                }
                Slot::Skip { next } => position = next,
                Slot::EndOfFile => return Err(TideError::SegmentClosed { cycle: self.cycle() }),
                Slot::Busy => {}
                Slot::NotWritten => {
                    if !self.claim(position)? {
                        continue;
                    }
                    if let Err(e) = self.ensure_allocated(position + needed) {
                        self.record_word(position)?
                            .store(NOT_WRITTEN, Ordering::Release);
                        return Err(e);
                    }
                    if !needs_checkpoint {
                        return Ok(Checkpoint { sequence, position });
                    }

                    let data_position = position + record::record_size(CHECKPOINT_LEN);
                    let payload = record::encode_checkpoint(sequence, data_position);
                    self.write_payload(position, 0, &payload)?;
                    self.publish(position, CHECKPOINT_LEN, true)?;
                    self.index.insert(sequence, data_position);
                    position = data_position;
                }
            }
        }
    }

    /// Copy part of a claimed record's payload
    ///
    /// The record may grow past its size hint while it is busy: nobody else
    /// can write beyond a busy record.
    pub(crate) fn write_payload(&self, position: u64, offset: u32, bytes: &[u8]) -> Result<()> {
        let end = offset as u64 + bytes.len() as u64;
        if end > MAX_PAYLOAD_LEN as u64 {
            return Err(TideError::Config(format!(
                "record of {} bytes exceeds the {} byte limit",
                end, MAX_PAYLOAD_LEN
            )));
        }
        let size = record::record_size(end as u32);
        if position + size > self.limit() {
            return Err(self.full(position, size));
        }
        self.ensure_allocated(position + size)?;
        // SAFETY: the caller holds the record busy, so the range after its
        // header word up to the limit is ours alone.
        unsafe {
            self.map
                .write_at(position + RECORD_HEADER_SIZE + offset as u64, bytes)
        }
    }

    /// Publish a claimed record with its final length
    pub(crate) fn publish(&self, position: u64, len: u32, metadata: bool) -> Result<()> {
        let word = self.record_word(position)?;
        word.store(record::ready_word(len, metadata), Ordering::Release);
        self.set_write_position(position)
    }

    /// Decode the record a reader at `position` (expecting `sequence`)
    /// sees, waiting through a busy record
    pub(crate) fn read_slot(&self, position: u64, sequence: u64) -> Result<Slot> {
        self.slot_at(position, sequence, true)
    }

    /// Payload of a ready record
    pub(crate) fn payload(&self, position: u64, len: u32) -> Result<&[u8]> {
        let start = position + RECORD_HEADER_SIZE;
        if start + len as u64 > self.allocated() {
            return Err(self.corrupted(position, "payload runs past the allocated file"));
        }
        self.map.bytes(start, len as usize)
    }

    /// msync one record
    pub(crate) fn sync_record(&self, position: u64, len: u32) -> Result<()> {
        let size = record::record_size(len);
        self.map.flush_range(position, size as usize)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Returns true if this call built the header
    fn init_header(map: &MappedFile, cycle: i64, config: &Config, may_build: bool) -> Result<bool> {
        let state = map.atomic_u32(STATE_OFFSET)?;

        wait_for(
            config.timeout(),
            || format!("header of {:?} to be built", map.path()),
            || match HeaderState::from_word(state.load(Ordering::Acquire)) {
                HeaderState::Built => Ok(Some(false)),
                HeaderState::Uninitialized if may_build => {
                    if state
                        .compare_exchange(UNINITIALIZED, BUILDING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return Ok(None);
                    }
                    let fields = HeaderFields {
                        version: header::VERSION,
                        epoch: config.epoch,
                        cycle,
                        capacity: map.len() as u64,
                        source_id: config.source_id,
                        delta_checkpoint_interval: config.effective_checkpoint_interval(),
                        sequence_bits: config.roll_cycle.sequence_bits(),
                    };
                    // SAFETY: the CAS above put the header in Building for us.
                    unsafe { header::write_fields(map, &fields, map.file_len()?)? };
                    state.store(BUILT, Ordering::Release);
                    map.flush_range(0, HEADER_SIZE as usize)?;
                    Ok(Some(true))
                }
                HeaderState::Uninitialized | HeaderState::Building => Ok(None),
                HeaderState::Unknown(word) => Err(TideError::InvalidHeader {
                    path: map.path().to_path_buf(),
                    reason: format!("unknown header state {}", word),
                }),
            },
        )
    }

    fn validate(path: &Path, fields: &HeaderFields, cycle: i64, roll_cycle: &RollCycle) -> Result<()> {
        let invalid = |reason: String| TideError::InvalidHeader {
            path: path.to_path_buf(),
            reason,
        };
        if fields.cycle != cycle {
            return Err(invalid(format!(
                "header is for cycle {}, expected {}",
                fields.cycle, cycle
            )));
        }
        if fields.sequence_bits != roll_cycle.sequence_bits() {
            return Err(invalid(format!(
                "header uses {} sequence bits, roll cycle {} uses {}",
                fields.sequence_bits,
                roll_cycle.name(),
                roll_cycle.sequence_bits()
            )));
        }
        if fields.capacity < MIN_CAPACITY {
            return Err(invalid(format!(
                "capacity {} is below the {} byte minimum",
                fields.capacity, MIN_CAPACITY
            )));
        }
        if fields.delta_checkpoint_interval == 0 {
            return Err(invalid("checkpoint interval is zero".to_string()));
        }
        Ok(())
    }

    /// Last byte a record may end at; the rest is kept for the EOF marker
    fn limit(&self) -> u64 {
        self.fields.capacity - RECORD_HEADER_SIZE
    }

    fn full(&self, position: u64, needed: u64) -> TideError {
        TideError::SegmentFull {
            cycle: self.cycle(),
            needed,
            remaining: self.limit().saturating_sub(position),
        }
    }

    /// Grow the file so a record ending at `end`, and the header word of
    /// the record after it, are backed by the file
    ///
    /// Only the writer holding the busy tail record calls this.
    fn ensure_allocated(&self, end: u64) -> Result<()> {
        let needed = end + RECORD_HEADER_SIZE;
        if needed <= self.allocated() {
            return Ok(());
        }
        let target = needed
            .div_ceil(self.chunk_size)
            .saturating_mul(self.chunk_size)
            .min(self.fields.capacity);
        self.map.grow_file(target)?;
        self.header_counter(ALLOCATED_OFFSET)
            .fetch_max(target, Ordering::AcqRel);
        debug!(cycle = self.cycle(), allocated = target, "Grew segment");
        Ok(())
    }

    fn state_word(&self) -> &AtomicU32 {
        // SAFETY: the header was mapped and validated at open.
        unsafe { self.map.atomic_u32_unchecked(STATE_OFFSET) }
    }

    fn header_counter(&self, offset: u64) -> &AtomicU64 {
        // SAFETY: header offsets are in bounds and aligned for a validated
        // header.
        unsafe { self.map.atomic_u64_unchecked(offset) }
    }

    fn record_word(&self, position: u64) -> Result<&AtomicU32> {
        if position < DATA_START || position > self.limit() {
            return Err(self.corrupted(position, "record position outside the data area"));
        }
        if position + RECORD_HEADER_SIZE > self.allocated() {
            return Err(self.corrupted(position, "record position past the allocated file"));
        }
        self.map.atomic_u32(position)
    }

    fn claim(&self, position: u64) -> Result<bool> {
        Ok(self
            .record_word(position)?
            .compare_exchange(NOT_WRITTEN, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    fn needs_checkpoint(&self, sequence: u64) -> bool {
        let interval = self.delta_checkpoint_interval() as u64;
        sequence > 0
            && sequence % interval == 0
            && self.index.floor_by_sequence(sequence).sequence != sequence
    }

    fn wait_while_busy(&self, position: u64, timeout: Duration) -> Result<RecordState> {
        let word = self.record_word(position)?;
        wait_for(
            timeout,
            || format!("busy record at {} in {:?}", position, self.path()),
            || {
                let state = RecordState::decode(word.load(Ordering::Acquire));
                Ok((state != RecordState::Busy).then_some(state))
            },
        )
    }

    /// Decode the record at `position`, whose data sequence would be
    /// `sequence`; checkpoints met on the way are checked and learned
    fn slot_at(&self, position: u64, sequence: u64, wait: bool) -> Result<Slot> {
        let word = self.record_word(position)?;
        let mut state = RecordState::decode(word.load(Ordering::Acquire));
        if state == RecordState::Busy && wait {
            state = self.wait_while_busy(position, self.timeout)?;
        }

        match state {
            RecordState::NotWritten => Ok(Slot::NotWritten),
            RecordState::Busy => Ok(Slot::Busy),
            RecordState::EndOfFile => Ok(Slot::EndOfFile),
            RecordState::Data { len } => Ok(Slot::Data {
                len,
                next: self.next_position(position, len)?,
            }),
            RecordState::Metadata { len } => {
                let next = self.next_position(position, len)?;
                if len == CHECKPOINT_LEN {
                    self.learn_checkpoint(position, sequence, next)?;
                }
                Ok(Slot::Skip { next })
            }
            RecordState::Invalid(word) => Err(self.corrupted(
                position,
                format!("invalid record header {:#010x}", word),
            )),
        }
    }

    fn next_position(&self, position: u64, len: u32) -> Result<u64> {
        let next = position + record::record_size(len);
        if next > self.limit() {
            return Err(self.corrupted(
                position,
                format!("record of {} bytes runs past the end of the segment", len),
            ));
        }
        Ok(next)
    }

    fn learn_checkpoint(&self, position: u64, sequence: u64, next: u64) -> Result<()> {
        let payload = self.payload(position, CHECKPOINT_LEN)?;
        match record::decode_checkpoint(payload) {
            Some((seq, pos)) if seq == sequence && pos == next => {
                self.index.insert(seq, pos);
                Ok(())
            }
            Some((seq, pos)) => Err(self.corrupted(
                position,
                format!(
                    "checkpoint says sequence {} at {}, scan is at sequence {} at {}",
                    seq, pos, sequence, next
                ),
            )),
            None => Err(self.corrupted(position, "short checkpoint payload")),
        }
    }

    /// Scan forward from `from` to the data record with sequence `target`
    fn scan_to_sequence(&self, target: u64, from: Checkpoint) -> Result<ScanResult> {
        let mut position = from.position;
        let mut sequence = from.sequence;

        loop {
            let slot = match self.slot_at(position, sequence, true) {
                Ok(slot) => slot,
                Err(TideError::Corrupted { position, reason, .. }) => {
                    warn!(path = ?self.path(), position, %reason, "Corrupted record during index scan");
                    return Ok(ScanResult::Corrupted { position });
                }
                Err(e) => return Err(e),
            };

            match slot {
                Slot::Data { next, .. } => {
                    if sequence == target {
                        return Ok(ScanResult::Found { position });
                    }
                    sequence += 1;
                    position = next;
                }
                Slot::Skip { next } => position = next,
                Slot::NotWritten | Slot::Busy | Slot::EndOfFile => return Ok(ScanResult::NoData),
            }
        }
    }

    /// Scan from the last known point to the first record that is not ready
    fn scan_to_end(&self) -> Result<End> {
        let start = self.index.floor_by_position(self.write_position());
        let mut position = start.position;
        let mut sequence = start.sequence;

        loop {
            match self.slot_at(position, sequence, false)? {
                Slot::Data { next, .. } => {
                    sequence += 1;
                    position = next;
                }
                Slot::Skip { next } => position = next,
                Slot::NotWritten | Slot::Busy | Slot::EndOfFile => {
                    return Ok(End { position, sequence })
                }
            }
        }
    }

    fn corrupted(&self, position: u64, reason: impl Into<String>) -> TideError {
        TideError::Corrupted {
            path: self.path().to_path_buf(),
            position,
            reason: reason.into(),
        }
    }

    fn read_counter(&self, offset: u64) -> Option<u64> {
        match self.header_counter(offset).load(Ordering::Acquire) {
            UNSET => None,
            value => Some(value),
        }
    }

    /// Raise a replication counter; it never moves backwards
    fn raise_counter(&self, offset: u64, value: u64) -> Result<()> {
        if self.read_only {
            return Err(TideError::ReadOnly);
        }
        let _ = self
            .header_counter(offset)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == UNSET || value > current).then_some(value)
            });
        Ok(())
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

impl IndexLookup for SegmentStore {
    fn move_to_index_for_read(&self, index: u64) -> Result<ScanResult> {
        if self.roll_cycle.to_cycle(index) != self.cycle() {
            return Ok(ScanResult::NotReached);
        }
        let target = self.roll_cycle.to_sequence(index);
        let from = self.index.floor_by_sequence(target);
        self.scan_to_sequence(target, from)
    }

    fn linear_scan_to(&self, index: u64, known_index: u64, known_position: u64) -> Result<ScanResult> {
        let known_cycle = self.roll_cycle.to_cycle(known_index);
        let known_sequence = self.roll_cycle.to_sequence(known_index);
        let target = self.roll_cycle.to_sequence(index);

        if self.roll_cycle.to_cycle(index) != self.cycle()
            || known_cycle != self.cycle()
            || known_sequence > target
            || known_position < DATA_START
        {
            return self.move_to_index_for_read(index);
        }

        // A checkpoint closer to the target beats the caller's position
        let checkpoint = self.index.floor_by_sequence(target);
        let from = if checkpoint.sequence > known_sequence {
            checkpoint
        } else {
            Checkpoint {
                sequence: known_sequence,
                position: known_position,
            }
        };
        self.scan_to_sequence(target, from)
    }

    fn sequence_for_position(&self, position: u64, inclusive: bool) -> Result<Option<u64>> {
        let bound = if inclusive {
            position
        } else if position == 0 {
            return Ok(None);
        } else {
            position - 1
        };

        let start = self.index.floor_by_position(bound);
        let mut cursor = start.position;
        let mut sequence = start.sequence;
        let mut last = None;

        while cursor <= bound {
            match self.slot_at(cursor, sequence, true)? {
                Slot::Data { next, .. } => {
                    last = Some(sequence);
                    sequence += 1;
                    cursor = next;
                }
                Slot::Skip { next } => cursor = next,
                Slot::NotWritten | Slot::Busy | Slot::EndOfFile => break,
            }
        }

        Ok(last)
    }

    fn last_sequence_number(&self) -> Result<Option<u64>> {
        Ok(self.scan_to_end()?.sequence.checked_sub(1))
    }

    fn indexable(&self, index: u64) -> bool {
        self.roll_cycle.to_sequence(index) % self.delta_checkpoint_interval() as u64 == 0
    }

    fn set_position_for_sequence_number(&self, sequence: u64, position: u64) {
        self.index.insert(sequence, position);
    }

    fn move_to_end_for_read(&self) -> Result<Checkpoint> {
        let end = self.scan_to_end()?;
        Ok(Checkpoint {
            sequence: end.sequence,
            position: end.position,
        })
    }

    fn init_index(&self) -> Result<usize> {
        self.index.clear();
        let mut position = DATA_START;
        let mut sequence = 0;

        loop {
            match self.slot_at(position, sequence, false) {
                Ok(Slot::Data { next, .. }) => {
                    sequence += 1;
                    position = next;
                }
                Ok(Slot::Skip { next }) => position = next,
                Ok(Slot::NotWritten | Slot::Busy | Slot::EndOfFile) => break,
                Err(TideError::Corrupted { position, reason, .. }) => {
                    // Readers hit the same record and report it themselves
                    warn!(path = ?self.path(), position, %reason, "Index rebuild stopped at corrupted record");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self.index.len())
    }
}

impl WriteCursor for SegmentStore {
    fn write_position(&self) -> u64 {
        self.header_counter(WRITE_POSITION_OFFSET)
            .load(Ordering::Acquire)
    }

    fn set_write_position(&self, position: u64) -> Result<()> {
        if self.read_only {
            return Err(TideError::ReadOnly);
        }
        self.header_counter(WRITE_POSITION_OFFSET)
            .fetch_max(position, Ordering::AcqRel);
        Ok(())
    }

    fn write_eof(&self, timeout: Duration) -> Result<()> {
        if self.read_only {
            return Err(TideError::ReadOnly);
        }
        let start = self.index.floor_by_position(self.write_position());
        let mut position = start.position;
        let mut sequence = start.sequence;

        loop {
            match self.slot_at(position, sequence, false)? {
                Slot::Data { next, .. } => {
                    sequence += 1;
                    position = next;
                }
                Slot::Skip { next } => position = next,
                Slot::EndOfFile => return Ok(()),
                Slot::Busy => {
                    self.wait_while_busy(position, timeout)?;
                }
                Slot::NotWritten => {
                    let won = self
                        .record_word(position)?
                        .compare_exchange(NOT_WRITTEN, END_OF_FILE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if won {
                        self.header_counter(EOF_POSITION_OFFSET)
                            .store(position, Ordering::Release);
                        self.map.flush_range(position, RECORD_HEADER_SIZE as usize)?;
                        debug!(cycle = self.cycle(), position, records = sequence, "Wrote EOF marker");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.header_counter(EOF_POSITION_OFFSET).load(Ordering::Acquire) != 0
    }
}

impl ReplicationCounters for SegmentStore {
    fn last_index_replicated(&self) -> Option<u64> {
        self.read_counter(LAST_REPLICATED_OFFSET)
    }

    fn set_last_index_replicated(&self, index: u64) -> Result<()> {
        self.raise_counter(LAST_REPLICATED_OFFSET, index)
    }

    fn last_acknowledged_index_replicated(&self) -> Option<u64> {
        self.read_counter(LAST_ACKED_OFFSET)
    }

    fn set_last_acknowledged_index_replicated(&self, index: u64) -> Result<()> {
        self.raise_counter(LAST_ACKED_OFFSET, index)
    }
}

// =============================================================================
// Record Listing
// =============================================================================

/// What a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Data { sequence: u64, len: u32 },
    Checkpoint { sequence: u64, position: u64 },
    Padding { len: u32 },
    Busy,
    EndOfFile,
    Corrupted { word: u32 },
}

/// One entry of [`SegmentStore::records`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub position: u64,
    pub kind: RecordKind,
}

/// Iterator over the records of a segment, stopping at the first record
/// that is not ready (which is yielded if it is busy, EOF or corrupted)
pub struct Records<'a> {
    store: &'a SegmentStore,
    position: u64,
    sequence: u64,
    done: bool,
}

impl<'a> Records<'a> {
    fn stop(&mut self, kind: RecordKind) -> Option<RecordInfo> {
        self.done = true;
        Some(RecordInfo {
            position: self.position,
            kind,
        })
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = RecordInfo;

    fn next(&mut self) -> Option<RecordInfo> {
        if self.done {
            return None;
        }
        let store = self.store;
        let word = match store.record_word(self.position) {
            Ok(word) => word.load(Ordering::Acquire),
            Err(_) => {
                self.done = true;
                return None;
            }
        };

        let position = self.position;
        let (kind, len) = match RecordState::decode(word) {
            RecordState::NotWritten => {
                self.done = true;
                return None;
            }
            RecordState::Busy => return self.stop(RecordKind::Busy),
            RecordState::EndOfFile => return self.stop(RecordKind::EndOfFile),
            RecordState::Invalid(word) => return self.stop(RecordKind::Corrupted { word }),
            RecordState::Data { len } => {
                let kind = RecordKind::Data {
                    sequence: self.sequence,
                    len,
                };
                self.sequence += 1;
                (kind, len)
            }
            RecordState::Metadata { len } if len == CHECKPOINT_LEN => {
                let decoded = store
                    .payload(position, CHECKPOINT_LEN)
                    .ok()
                    .and_then(record::decode_checkpoint);
                match decoded {
                    Some((sequence, position)) => (RecordKind::Checkpoint { sequence, position }, len),
                    None => return self.stop(RecordKind::Corrupted { word }),
                }
            }
            RecordState::Metadata { len } => (RecordKind::Padding { len }, len),
        };

        match store.next_position(position, len) {
            Ok(next) => {
                self.position = next;
                Some(RecordInfo { position, kind })
            }
            Err(_) => self.stop(RecordKind::Corrupted { word }),
        }
    }
}
