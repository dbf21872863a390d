//! Tests for SegmentStore
//!
//! These tests verify:
//! - Header state machine (create, reopen, validation, stuck states)
//! - Concurrent creation of one segment builds its header once
//! - Chunked file growth up to the hard maximum
//! - Read-only stores refuse every shared-state write
//! - Index lookups: Found / NoData / NotReached / Corrupted
//! - Position -> sequence queries
//! - EOF markers and replication counters
//! - Coarse index rebuild on reopen

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;
use tidelog::config::TEST_CHUNK_SIZE;
use tidelog::store::{HeaderState, RecordKind, DATA_START};
use tidelog::time::SetTimeProvider;
use tidelog::{
    Config, IndexLookup, Queue, ReplicationCounters, RollCycle, ScanResult, SegmentStore,
    TideError, WriteCursor,
};

// =============================================================================
// Helper Functions
// =============================================================================

/// 2018-04-12 02:08:53 UTC
const NOW: i64 = 1_523_498_933_145;

fn setup_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .roll_cycle(RollCycle::DAILY)
        .test_block_size()
        .timeout_ms(100)
        .time_provider(Arc::new(SetTimeProvider::new(NOW)))
        .build()
}

fn setup_temp_store() -> (TempDir, Config, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config = setup_config(temp_dir.path());
    let path = temp_dir.path().join("19700101.tlog");
    (temp_dir, config, path)
}

/// Queue with `count` records of the form "record-N" in today's cycle
fn setup_queue_with_records(count: usize) -> (TempDir, Queue, Vec<u64>) {
    let temp_dir = TempDir::new().unwrap();
    let queue = Queue::open(setup_config(temp_dir.path())).unwrap();
    let mut appender = queue.acquire_appender().unwrap();
    let indexes = (0..count)
        .map(|i| appender.write_bytes(format!("record-{}", i).as_bytes()).unwrap())
        .collect();
    (temp_dir, queue, indexes)
}

fn write_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

fn found_position(result: ScanResult) -> u64 {
    match result {
        ScanResult::Found { position } => position,
        other => panic!("expected Found, got {:?}", other),
    }
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_open_missing_without_create() {
    let (_temp, config, path) = setup_temp_store();

    let store = SegmentStore::open(&path, 0, &config, false).unwrap();

    assert!(store.is_none());
    assert!(!path.exists());
}

#[test]
fn test_create_builds_header() {
    let (_temp, config, path) = setup_temp_store();

    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();

    assert_eq!(store.header_state(), HeaderState::Built);
    assert_eq!(store.cycle(), 0);
    assert_eq!(store.epoch(), 0);
    assert_eq!(store.source_id(), 0);
    assert_eq!(store.delta_checkpoint_interval(), 64);
    assert_eq!(store.capacity(), config.segment_size);
    assert!(store.built_here());
    // The file starts at one chunk and grows on demand
    assert_eq!(store.allocated(), TEST_CHUNK_SIZE);
    assert_eq!(fs::metadata(&path).unwrap().len(), TEST_CHUNK_SIZE);
    assert_eq!(store.write_position(), 0);
    assert!(!store.is_closed());
}

#[test]
fn test_reopen_keeps_header_fields() {
    let (_temp, config, path) = setup_temp_store();
    let config = Config {
        source_id: 9,
        delta_checkpoint_interval: Some(8),
        ..config
    };
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());

    // A different interval in the config does not override the file
    let other = Config {
        delta_checkpoint_interval: Some(32),
        ..config.clone()
    };
    let store = SegmentStore::open(&path, 0, &other, false).unwrap().unwrap();

    assert_eq!(store.source_id(), 9);
    assert_eq!(store.delta_checkpoint_interval(), 8);
}

#[test]
fn test_reopen_with_wrong_cycle_fails() {
    let (_temp, config, path) = setup_temp_store();
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());

    let err = SegmentStore::open(&path, 5, &config, false).unwrap_err();

    assert!(matches!(err, TideError::InvalidHeader { .. }));
}

#[test]
fn test_reopen_with_wrong_sequence_bits_fails() {
    let (_temp, config, path) = setup_temp_store();
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());

    let other = Config {
        roll_cycle: RollCycle::LARGE_DAILY,
        ..config
    };
    let err = SegmentStore::open(&path, 0, &other, false).unwrap_err();

    assert!(matches!(err, TideError::InvalidHeader { .. }));
}

#[test]
fn test_tampered_header_fails_checksum() {
    let (_temp, config, path) = setup_temp_store();
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());

    // Source id lives at offset 40
    write_at(&path, 40, &[0xFF]);
    let err = SegmentStore::open(&path, 0, &config, false).unwrap_err();

    match err {
        TideError::InvalidHeader { reason, .. } => assert!(reason.contains("checksum")),
        other => panic!("expected InvalidHeader, got {:?}", other),
    }
}

#[test]
fn test_uninitialized_header_is_waited_for_not_built() {
    let (_temp, config, path) = setup_temp_store();
    fs::File::create(&path)
        .unwrap()
        .set_len(config.segment_size)
        .unwrap();

    let err = SegmentStore::open(&path, 0, &config, false).unwrap_err();
    assert!(matches!(err, TideError::Timeout { .. }));

    // A creating open builds it
    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();
    assert_eq!(store.header_state(), HeaderState::Built);
}

#[test]
fn test_stuck_building_header_times_out() {
    let (_temp, config, path) = setup_temp_store();
    fs::File::create(&path)
        .unwrap()
        .set_len(config.segment_size)
        .unwrap();
    write_at(&path, 0, &1u32.to_le_bytes());

    let err = SegmentStore::open(&path, 0, &config, true).unwrap_err();

    match err {
        TideError::Timeout { what, waited_ms } => {
            assert!(what.contains("header"));
            assert!(waited_ms >= 100);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[test]
fn test_existing_larger_file_is_not_shrunk() {
    let (_temp, config, path) = setup_temp_store();
    let larger = config.segment_size * 2;
    fs::File::create(&path).unwrap().set_len(larger).unwrap();

    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();

    assert_eq!(store.capacity(), larger);
    assert_eq!(store.allocated(), larger);
    assert_eq!(fs::metadata(&path).unwrap().len(), larger);
}

#[test]
fn test_reopen_with_smaller_maximum_keeps_file_capacity() {
    let (_temp, config, path) = setup_temp_store();
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());

    let other = Config {
        segment_size: 4_096,
        ..config.clone()
    };
    let store = SegmentStore::open(&path, 0, &other, false).unwrap().unwrap();

    assert!(!store.built_here());
    assert_eq!(store.capacity(), config.segment_size);
}

#[test]
fn test_concurrent_create_builds_header_once() {
    let threads = 8;
    for _ in 0..10 {
        let (_temp, config, path) = setup_temp_store();
        let config = Config {
            timeout_ms: 5_000,
            ..config
        };
        let barrier = Barrier::new(threads);

        let stores: Vec<SegmentStore> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        SegmentStore::open(&path, 0, &config, true).unwrap().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(stores.iter().filter(|s| s.built_here()).count(), 1);
        for store in &stores {
            assert_eq!(store.header_state(), HeaderState::Built);
            assert_eq!(store.capacity(), config.segment_size);
            assert_eq!(store.allocated(), TEST_CHUNK_SIZE);
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), TEST_CHUNK_SIZE);
    }
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_segment_grows_in_chunks_up_to_maximum() {
    let (temp, queue, _) = setup_queue_with_records(0);
    let mut appender = queue.acquire_appender().unwrap();
    let payload = |i: usize| vec![(i % 251) as u8; 1_000];

    for i in 0..40 {
        appender.write_bytes(&payload(i)).unwrap();
    }
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    let file_len = fs::metadata(store.path()).unwrap().len();
    assert!(store.allocated() > TEST_CHUNK_SIZE);
    assert!(store.allocated() < store.capacity());
    assert_eq!(store.allocated() % TEST_CHUNK_SIZE, 0);
    assert_eq!(file_len, store.allocated());

    // Another mapping of the file sees every record
    let reader = Queue::open_existing(temp.path(), true).unwrap();
    let mut tailer = reader.create_tailer();
    for i in 0..40 {
        assert_eq!(tailer.read_bytes().unwrap().unwrap().as_ref(), &payload(i)[..]);
    }
    assert!(tailer.read_bytes().unwrap().is_none());

    // The hard maximum still ends the segment
    let mut written = 40;
    let err = loop {
        match appender.write_bytes(&payload(written)) {
            Ok(_) => written += 1,
            Err(e) => break e,
        }
    };
    assert!(matches!(err, TideError::SegmentFull { .. }), "got {:?}", err);
    assert_eq!(store.allocated(), store.capacity());
    assert_eq!(fs::metadata(store.path()).unwrap().len(), store.capacity());
    assert_eq!(
        store.last_sequence_number().unwrap(),
        Some(written as u64 - 1)
    );
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_read_only_store_refuses_writes() {
    let (_temp, config, path) = setup_temp_store();
    drop(SegmentStore::open(&path, 0, &config, true).unwrap().unwrap());
    let read_only = Config {
        read_only: true,
        ..config
    };

    let store = SegmentStore::open(&path, 0, &read_only, true).unwrap().unwrap();

    assert!(matches!(store.set_last_index_replicated(1), Err(TideError::ReadOnly)));
    assert!(matches!(
        store.set_last_acknowledged_index_replicated(1),
        Err(TideError::ReadOnly)
    ));
    assert!(matches!(store.set_write_position(DATA_START), Err(TideError::ReadOnly)));
    assert!(matches!(
        store.write_eof(std::time::Duration::from_millis(100)),
        Err(TideError::ReadOnly)
    ));
    assert_eq!(store.last_index_replicated(), None);
    assert!(!store.is_closed());
    store.flush().unwrap();

    // Create is ignored for a missing file
    let missing = path.with_file_name("19700102.tlog");
    assert!(SegmentStore::open(&missing, 1, &read_only, true).unwrap().is_none());
    assert!(!missing.exists());
}

// =============================================================================
// Index Lookup Tests
// =============================================================================

#[test]
fn test_move_to_index_for_read_finds_every_record() {
    let (_temp, queue, indexes) = setup_queue_with_records(10);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();

    let mut last = 0;
    for index in &indexes {
        let position = found_position(store.move_to_index_for_read(*index).unwrap());
        assert!(position > last);
        last = position;
    }
    assert_eq!(
        found_position(store.move_to_index_for_read(indexes[0]).unwrap()),
        DATA_START
    );
}

#[test]
fn test_move_to_index_for_read_no_data_past_end() {
    let (_temp, queue, indexes) = setup_queue_with_records(3);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();

    let result = store.move_to_index_for_read(indexes[2] + 1).unwrap();

    assert_eq!(result, ScanResult::NoData);
}

#[test]
fn test_move_to_index_for_read_other_cycle_not_reached() {
    let (_temp, queue, indexes) = setup_queue_with_records(3);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    let next_cycle = queue.roll_cycle().to_index(queue.cycle() + 1, 0).unwrap();

    assert_eq!(
        store.move_to_index_for_read(next_cycle).unwrap(),
        ScanResult::NotReached
    );
    assert!(store.move_to_index_for_read(indexes[0]).unwrap().is_found());
}

#[test]
fn test_linear_scan_from_known_record() {
    let (_temp, queue, indexes) = setup_queue_with_records(20);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    let known = found_position(store.move_to_index_for_read(indexes[5]).unwrap());

    let direct = store.move_to_index_for_read(indexes[17]).unwrap();
    let scanned = store.linear_scan_to(indexes[17], indexes[5], known).unwrap();

    assert_eq!(direct, scanned);
    // Known index after the target falls back to a lookup
    let behind = store.linear_scan_to(indexes[2], indexes[5], known).unwrap();
    assert_eq!(behind, store.move_to_index_for_read(indexes[2]).unwrap());
}

#[test]
fn test_sequence_for_position() {
    let (_temp, queue, indexes) = setup_queue_with_records(3);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    let p0 = found_position(store.move_to_index_for_read(indexes[0]).unwrap());
    let p1 = found_position(store.move_to_index_for_read(indexes[1]).unwrap());

    assert_eq!(store.sequence_for_position(p0, true).unwrap(), Some(0));
    assert_eq!(store.sequence_for_position(p0, false).unwrap(), None);
    assert_eq!(store.sequence_for_position(p1, true).unwrap(), Some(1));
    assert_eq!(store.sequence_for_position(p1, false).unwrap(), Some(0));
    assert_eq!(store.sequence_for_position(p1 + 1, false).unwrap(), Some(1));
    assert_eq!(store.sequence_for_position(u32::MAX as u64, true).unwrap(), Some(2));
}

#[test]
fn test_last_sequence_number() {
    let (_temp, config, path) = setup_temp_store();
    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();
    assert_eq!(store.last_sequence_number().unwrap(), None);

    let (_temp, queue, _) = setup_queue_with_records(7);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    assert_eq!(store.last_sequence_number().unwrap(), Some(6));
}

#[test]
fn test_indexable_follows_interval() {
    let (_temp, config, path) = setup_temp_store();
    let config = Config {
        delta_checkpoint_interval: Some(4),
        ..config
    };
    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();
    let rc = RollCycle::DAILY;

    assert!(store.indexable(rc.to_index(0, 0).unwrap()));
    assert!(!store.indexable(rc.to_index(0, 3).unwrap()));
    assert!(store.indexable(rc.to_index(0, 4).unwrap()));
    assert!(store.indexable(rc.to_index(0, 64).unwrap()));
}

#[test]
fn test_corrupted_record_header() {
    let (_temp, queue, indexes) = setup_queue_with_records(5);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();
    let p2 = found_position(store.move_to_index_for_read(indexes[2]).unwrap());

    // The mapping shares the page cache with ordinary file writes
    write_at(store.path(), p2, &0xDEAD_BEEFu32.to_le_bytes());

    assert!(store.move_to_index_for_read(indexes[1]).unwrap().is_found());
    assert_eq!(
        store.move_to_index_for_read(indexes[2]).unwrap(),
        ScanResult::Corrupted { position: p2 }
    );
    assert_eq!(
        store.move_to_index_for_read(indexes[4]).unwrap(),
        ScanResult::Corrupted { position: p2 }
    );
    assert!(store.records().any(|r| r.kind == RecordKind::Corrupted { word: 0xDEAD_BEEF }));
}

// =============================================================================
// Coarse Index Tests
// =============================================================================

#[test]
fn test_init_index_learns_checkpoints_on_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        delta_checkpoint_interval: Some(4),
        ..setup_config(temp_dir.path())
    };
    let queue = Queue::open(config.clone()).unwrap();
    let mut appender = queue.acquire_appender().unwrap();
    let indexes: Vec<u64> = (0..18u32)
        .map(|i| appender.write_bytes(&i.to_le_bytes()).unwrap())
        .collect();
    let path = queue.segment_path(queue.cycle()).unwrap();

    // A second mapping of the same file rebuilds its index from scratch
    let store = SegmentStore::open(&path, queue.cycle(), &config, false)
        .unwrap()
        .unwrap();

    // Implicit 0 plus checkpoints for 4, 8, 12, 16
    assert_eq!(store.init_index().unwrap(), 5);

    let checkpoints: Vec<(u64, u64)> = store
        .records()
        .filter_map(|r| match r.kind {
            RecordKind::Checkpoint { sequence, position } => Some((sequence, position)),
            _ => None,
        })
        .collect();
    assert_eq!(checkpoints.len(), 4);
    for (sequence, position) in checkpoints {
        let found = store
            .move_to_index_for_read(indexes[sequence as usize])
            .unwrap();
        assert_eq!(found, ScanResult::Found { position });
    }
}

// =============================================================================
// EOF and Counter Tests
// =============================================================================

#[test]
fn test_write_eof_terminates_segment() {
    let (_temp, queue, indexes) = setup_queue_with_records(3);
    let store = queue.store_for_cycle(queue.cycle(), false).unwrap().unwrap();

    store.write_eof(std::time::Duration::from_millis(100)).unwrap();

    assert!(store.is_closed());
    assert_eq!(store.records().last().unwrap().kind, RecordKind::EndOfFile);
    assert_eq!(
        store.move_to_index_for_read(indexes[2] + 1).unwrap(),
        ScanResult::NoData
    );
    assert!(store.move_to_index_for_read(indexes[2]).unwrap().is_found());

    // A second EOF is a no-op
    store.write_eof(std::time::Duration::from_millis(100)).unwrap();
    assert_eq!(
        store
            .records()
            .filter(|r| r.kind == RecordKind::EndOfFile)
            .count(),
        1
    );
}

#[test]
fn test_replication_counters() {
    let (_temp, config, path) = setup_temp_store();
    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();
    assert_eq!(store.last_index_replicated(), None);
    assert_eq!(store.last_acknowledged_index_replicated(), None);

    store.set_last_index_replicated(5).unwrap();
    store.set_last_index_replicated(3).unwrap();
    store.set_last_acknowledged_index_replicated(2).unwrap();
    assert_eq!(store.last_index_replicated(), Some(5));
    assert_eq!(store.last_acknowledged_index_replicated(), Some(2));
    drop(store);

    let store = SegmentStore::open(&path, 0, &config, false).unwrap().unwrap();
    assert_eq!(store.last_index_replicated(), Some(5));
    assert_eq!(store.last_acknowledged_index_replicated(), Some(2));
}

#[test]
fn test_write_position_is_monotonic() {
    let (_temp, config, path) = setup_temp_store();
    let store = SegmentStore::open(&path, 0, &config, true).unwrap().unwrap();

    store.set_write_position(DATA_START + 64).unwrap();
    store.set_write_position(DATA_START).unwrap();

    assert_eq!(store.write_position(), DATA_START + 64);
}
