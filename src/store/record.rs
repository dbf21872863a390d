//! Record header word
//!
//! Every record starts with one 4-byte word that is the only thing readers
//! and competing writers coordinate on:
//!
//! ```text
//! 0x0000_0000          not written
//! 0x8000_0000          busy: reserved by a writer, payload in progress
//! 0xC000_0000          end of file: the segment was rolled
//! 0x2000_0000 | len    ready data record
//! 0x6000_0000 | len    ready metadata record
//! ```
//!
//! Any other value is corruption. Records are 4-byte aligned.

/// Set while a writer owns the record
pub(crate) const NOT_COMPLETE: u32 = 0x8000_0000;
/// Record carries queue bookkeeping rather than user data
pub(crate) const META_DATA: u32 = 0x4000_0000;
/// Set once the record is published
pub(crate) const PRESENT: u32 = 0x2000_0000;
pub(crate) const LENGTH_MASK: u32 = 0x1FFF_FFFF;

pub(crate) const NOT_WRITTEN: u32 = 0;
pub(crate) const BUSY: u32 = NOT_COMPLETE;
pub(crate) const END_OF_FILE: u32 = NOT_COMPLETE | META_DATA;

/// Size of the header word
pub(crate) const RECORD_HEADER_SIZE: u64 = 4;
pub(crate) const RECORD_ALIGN: u64 = 4;

/// Largest payload a header word can describe
pub const MAX_PAYLOAD_LEN: u32 = LENGTH_MASK;

/// Payload length of a coarse checkpoint: sequence (8) + position (8)
pub(crate) const CHECKPOINT_LEN: u32 = 16;

/// Decoded header word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    NotWritten,
    Busy,
    EndOfFile,
    Data { len: u32 },
    Metadata { len: u32 },
    Invalid(u32),
}

impl RecordState {
    pub(crate) fn decode(word: u32) -> Self {
        match word {
            NOT_WRITTEN => RecordState::NotWritten,
            BUSY => RecordState::Busy,
            END_OF_FILE => RecordState::EndOfFile,
            w if w & !(META_DATA | LENGTH_MASK) == PRESENT => {
                let len = w & LENGTH_MASK;
                if w & META_DATA != 0 {
                    RecordState::Metadata { len }
                } else {
                    RecordState::Data { len }
                }
            }
            w => RecordState::Invalid(w),
        }
    }
}

/// Header word of a published record
pub(crate) fn ready_word(len: u32, metadata: bool) -> u32 {
    let flags = if metadata { PRESENT | META_DATA } else { PRESENT };
    flags | (len & LENGTH_MASK)
}

/// Bytes a record with `len` payload bytes occupies, header and padding included
pub(crate) fn record_size(len: u32) -> u64 {
    let raw = RECORD_HEADER_SIZE + len as u64;
    (raw + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

pub(crate) fn encode_checkpoint(sequence: u64, position: u64) -> [u8; CHECKPOINT_LEN as usize] {
    let mut buf = [0u8; CHECKPOINT_LEN as usize];
    buf[0..8].copy_from_slice(&sequence.to_le_bytes());
    buf[8..16].copy_from_slice(&position.to_le_bytes());
    buf
}

pub(crate) fn decode_checkpoint(payload: &[u8]) -> Option<(u64, u64)> {
    if payload.len() != CHECKPOINT_LEN as usize {
        return None;
    }
    let mut seq = [0u8; 8];
    let mut pos = [0u8; 8];
    seq.copy_from_slice(&payload[0..8]);
    pos.copy_from_slice(&payload[8..16]);
    Some((u64::from_le_bytes(seq), u64::from_le_bytes(pos)))
}
