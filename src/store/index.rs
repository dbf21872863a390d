//! Coarse index
//!
//! Sparse in-memory table of `(sequence, position)` checkpoints for one
//! segment. Checkpoints live in the segment as metadata records; this table
//! is a cache of the ones seen so far, learned on scans and rebuilt in full
//! by `init_index`. Sequence 0 at the first record is always known.

use parking_lot::RwLock;

/// A known record position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub sequence: u64,
    /// Start of the data record with this sequence
    pub position: u64,
}

/// Sorted checkpoints for one segment
#[derive(Debug)]
pub struct CoarseIndex {
    /// Ordered by sequence (and therefore by position); never empty
    entries: RwLock<Vec<Checkpoint>>,
}

impl CoarseIndex {
    pub fn new(first_position: u64) -> Self {
        Self {
            entries: RwLock::new(vec![Checkpoint {
                sequence: 0,
                position: first_position,
            }]),
        }
    }

    /// Record a checkpoint; known sequences are left as they are
    pub fn insert(&self, sequence: u64, position: u64) {
        let mut entries = self.entries.write();
        let at = entries.partition_point(|c| c.sequence < sequence);
        if entries.get(at).map(|c| c.sequence) == Some(sequence) {
            return;
        }
        entries.insert(at, Checkpoint { sequence, position });
    }

    /// Closest checkpoint at or before `sequence`
    pub fn floor_by_sequence(&self, sequence: u64) -> Checkpoint {
        let entries = self.entries.read();
        let at = entries.partition_point(|c| c.sequence <= sequence);
        entries[at.saturating_sub(1)]
    }

    /// Closest checkpoint at or before `position`
    pub fn floor_by_position(&self, position: u64) -> Checkpoint {
        let entries = self.entries.read();
        let at = entries.partition_point(|c| c.position <= position);
        entries[at.saturating_sub(1)]
    }

    /// Highest checkpoint known
    pub fn last(&self) -> Checkpoint {
        let entries = self.entries.read();
        entries[entries.len() - 1]
    }

    /// Drop everything except the implicit first checkpoint
    pub fn clear(&self) {
        self.entries.write().truncate(1);
    }

    /// Checkpoints known, counting the implicit first one
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
