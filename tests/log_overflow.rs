//! # Bounded Log Integration Tests
//!
//! Covers the durable overflow buffer end to end:
//!
//! 1. Plain appends and size bookkeeping
//! 2. The overflow protocol (drain in order, reset, append)
//! 3. Sink failure leaving the log untouched
//! 4. Structural validation of closed logs (`check`)
//! 5. Reopen after close recovering the committed offset

use eyre::{bail, Result};
use tempfile::tempdir;
use tiermem::{BoundedLog, LogError};

fn no_drain_expected(_chunk: &[u8]) -> Result<()> {
    panic!("drain must not run for a write that fits");
}

#[test]
fn test_append_tracks_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 1024).unwrap();
    assert_eq!(log.current_size(), 0);
    assert_eq!(log.max_capacity(), 1024);

    log.append(b"hello").unwrap();
    log.append(b" world").unwrap();
    assert_eq!(log.current_size(), 11);
}

#[test]
fn test_append_is_all_or_nothing_at_capacity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 64).unwrap();
    log.append(&[0xAA; 60]).unwrap();

    let err = log.append(&[0xBB; 8]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LogError>(),
        Some(LogError::WouldOverflow { requested: 8, remaining: 4 })
    ));
    assert_eq!(log.current_size(), 60, "failed append must not change the log");
}

#[test]
fn test_failed_append_leaves_memory_and_disk_in_agreement() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 64).unwrap();
    log.append(&[1u8; 60]).unwrap();
    log.append(&[2u8; 8]).unwrap_err();

    // The size the instance reports must match the committed offset in the
    // durable header (bytes 24..32) even right after a failed append.
    let contents = std::fs::read(&path).unwrap();
    let committed = u64::from_le_bytes(contents[24..32].try_into().unwrap());
    assert_eq!(committed, log.current_size());
    assert_eq!(committed, 60);

    log.close().unwrap();
    let reopened = BoundedLog::open(&path).unwrap();
    assert_eq!(reopened.current_size(), 60);
}

#[test]
fn test_write_within_capacity_returns_sequence_marker() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 100).unwrap();

    let marker = log
        .write_with_overflow(&[1u8; 60], &mut no_drain_expected)
        .unwrap();
    assert_eq!(marker, 0);
    assert_eq!(log.current_size(), 60);
}

#[test]
fn test_overflow_drains_previous_contents_then_appends() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 100).unwrap();
    log.write_with_overflow(&[1u8; 60], &mut no_drain_expected)
        .unwrap();

    // 60 + 60 >= 100: the second write triggers the overflow protocol.
    let mut drained = Vec::new();
    let mut sink = |chunk: &[u8]| -> Result<()> {
        drained.extend_from_slice(chunk);
        Ok(())
    };
    let marker = log.write_with_overflow(&[2u8; 60], &mut sink).unwrap();

    assert_eq!(marker, 60, "marker is the pre-overflow size");
    assert_eq!(drained, vec![1u8; 60], "drain carries all prior bytes in order");
    assert_eq!(log.current_size(), 60, "log holds only the new write");
}

#[test]
fn test_overflow_drain_preserves_append_order_across_chunks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 256).unwrap();
    let mut expected = Vec::new();
    for byte in 0u8..4 {
        let record = vec![byte; 50];
        log.append(&record).unwrap();
        expected.extend_from_slice(&record);
    }

    let mut drained = Vec::new();
    let mut sink = |chunk: &[u8]| -> Result<()> {
        drained.extend_from_slice(chunk);
        Ok(())
    };
    log.write_with_overflow(&[9u8; 100], &mut sink).unwrap();

    assert_eq!(drained, expected);
    assert_eq!(log.current_size(), 100);
}

#[test]
fn test_sink_failure_aborts_with_log_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 100).unwrap();
    log.append(&[7u8; 80]).unwrap();

    let mut sink = |_chunk: &[u8]| -> Result<()> { bail!("sink is offline") };
    let err = log.write_with_overflow(&[8u8; 40], &mut sink).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<LogError>(),
        Some(LogError::DrainSinkFailure)
    ));
    assert_eq!(log.current_size(), 80, "contents preserved after sink failure");

    // The preserved bytes are still drainable once the sink recovers.
    let mut drained = Vec::new();
    let mut recovered = |chunk: &[u8]| -> Result<()> {
        drained.extend_from_slice(chunk);
        Ok(())
    };
    log.drain_to(&mut recovered).unwrap();
    assert_eq!(drained, vec![7u8; 80]);
}

#[test]
fn test_oversized_write_after_reset_reports_overflow_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 100).unwrap();
    log.append(&[1u8; 50]).unwrap();

    // 150 bytes can never fit: drain+reset succeed, the append then fails.
    let mut drained = Vec::new();
    let mut sink = |chunk: &[u8]| -> Result<()> {
        drained.extend_from_slice(chunk);
        Ok(())
    };
    let err = log.write_with_overflow(&[2u8; 150], &mut sink).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<LogError>(),
        Some(LogError::OverflowWriteFailure { requested: 150, capacity: 100 })
    ));
    assert_eq!(drained, vec![1u8; 50], "drain still ran before the failure");
    assert_eq!(log.current_size(), 0, "log left empty, resource intact");
}

#[test]
fn test_rewind_empties_without_destroying_resource() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 128).unwrap();
    log.append(&[3u8; 100]).unwrap();
    log.rewind().unwrap();

    assert_eq!(log.current_size(), 0);
    log.append(&[4u8; 128]).unwrap();
    assert_eq!(log.current_size(), 128);
}

#[test]
fn test_reopen_recovers_committed_offset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    {
        let mut log = BoundedLog::create(&path, 256).unwrap();
        log.append(b"durable record").unwrap();
        log.close().unwrap();
    }

    let log = BoundedLog::open(&path).unwrap();
    assert_eq!(log.current_size(), 14);
    assert_eq!(log.max_capacity(), 256);
}

#[test]
fn test_open_missing_file_is_unavailable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nonexistent.log");

    let err = BoundedLog::open(&path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LogError>(),
        Some(LogError::Unavailable { .. })
    ));
}

#[test]
fn test_create_rejects_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    BoundedLog::create(&path, 128).unwrap().close().unwrap();
    assert!(BoundedLog::create(&path, 128).is_err());
}

#[test]
fn test_check_passes_on_clean_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 128).unwrap();
    log.append(&[5u8; 64]).unwrap();
    log.close().unwrap();

    assert!(BoundedLog::check(&path));
}

#[test]
fn test_check_fails_on_truncated_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 128).unwrap();
    log.append(&[5u8; 64]).unwrap();
    log.close().unwrap();

    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(32).unwrap();

    assert!(!BoundedLog::check(&path));
}

#[test]
fn test_check_fails_on_corrupted_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    BoundedLog::create(&path, 128).unwrap().close().unwrap();

    let contents = std::fs::read(&path).unwrap();
    let mut corrupted = contents.clone();
    corrupted[20] ^= 0xFF; // inside the capacity field
    std::fs::write(&path, &corrupted).unwrap();

    assert!(!BoundedLog::check(&path));
}

#[test]
fn test_check_never_opens_for_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("buffer.log");

    let mut log = BoundedLog::create(&path, 128).unwrap();
    log.append(&[6u8; 10]).unwrap();
    log.close().unwrap();

    let before = std::fs::read(&path).unwrap();
    assert!(BoundedLog::check(&path));
    let after = std::fs::read(&path).unwrap();

    assert_eq!(before, after);
}
