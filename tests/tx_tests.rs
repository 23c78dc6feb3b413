//! Tests for transaction buffers
//!
//! These tests verify:
//! - Nesting semantics of begin/commit on both policies
//! - Dirty-tag lifecycle of the bitmap-tagged policy
//! - Forced reset via truncate(0)
//! - Bounded close waiting for in-flight transactions
//! - Rollback rejection

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use plexfile::{Bitlist, FileBuffer, MemBuffer, NonTxBuffer, PlexError, TaggedTxBuffer, TxFileBuffer};

// =============================================================================
// Helper Functions
// =============================================================================

fn tag_bitlist() -> Arc<Bitlist> {
    Arc::new(Bitlist::new(
        Arc::new(MemBuffer::new()) as Arc<dyn FileBuffer>
    ))
}

fn tagged(tag_index: u64) -> (TaggedTxBuffer<MemBuffer>, Arc<Bitlist>) {
    let tags = tag_bitlist();
    let buffer = TaggedTxBuffer::new(MemBuffer::new(), Arc::clone(&tags), tag_index);
    (buffer, tags)
}

// =============================================================================
// Pass-Through Policy Tests
// =============================================================================

#[test]
fn test_passthrough_nesting() {
    let buffer = NonTxBuffer::new(MemBuffer::new());
    assert!(buffer.is_clean().unwrap());
    assert!(!buffer.commit().unwrap());

    buffer.begin().unwrap();
    buffer.begin().unwrap();
    assert!(!buffer.is_clean().unwrap());
    assert!(buffer.commit().unwrap());
    assert!(buffer.commit().unwrap());
    assert!(buffer.is_clean().unwrap());
    assert!(!buffer.commit().unwrap());
}

#[test]
fn test_passthrough_passes_io_through() {
    let buffer = NonTxBuffer::new(MemBuffer::new());
    buffer.write_at(0, b"payload").unwrap();
    let mut out = [0u8; 7];
    assert_eq!(buffer.read_at(0, &mut out).unwrap(), 7);
    assert_eq!(&out, b"payload");
    assert!(buffer.is_clean().unwrap());
}

#[test]
fn test_passthrough_rollback_unsupported() {
    let buffer = NonTxBuffer::new(MemBuffer::new());
    assert!(!buffer.is_rollback_supported());
    assert!(matches!(buffer.rollback(), Err(PlexError::Unsupported(_))));
}

// =============================================================================
// Tagged Policy Tests
// =============================================================================

#[test]
fn test_tagged_dirty_bit_lifecycle() {
    let (buffer, tags) = tagged(7);
    assert!(!tags.get(7).unwrap());
    assert!(buffer.is_clean().unwrap());

    buffer.begin().unwrap();
    assert!(tags.get(7).unwrap(), "first begin sets the tag");
    assert!(!buffer.is_clean().unwrap());

    buffer.begin().unwrap();
    buffer.commit().unwrap();
    assert!(tags.get(7).unwrap(), "inner commit keeps the tag");

    buffer.commit().unwrap();
    assert!(!tags.get(7).unwrap(), "last commit clears the tag");
    assert!(buffer.is_clean().unwrap());
}

#[test]
fn test_tagged_write_is_bracketed() {
    let (buffer, tags) = tagged(3);
    buffer.write_at(0, b"data").unwrap();
    // The write opened and closed its own transaction.
    assert!(!tags.get(3).unwrap());
    assert!(buffer.is_clean().unwrap());

    // Under an outer transaction the tag persists across writes.
    buffer.begin().unwrap();
    buffer.write_at(4, b"more").unwrap();
    assert!(tags.get(3).unwrap());
    buffer.commit().unwrap();
    assert!(!tags.get(3).unwrap());
}

#[test]
fn test_tagged_surviving_tag_means_unclean() {
    let tags = tag_bitlist();
    // Simulate a crash: the previous incarnation died with the tag set.
    tags.set(5).unwrap();

    let buffer = TaggedTxBuffer::new(MemBuffer::new(), Arc::clone(&tags), 5);
    assert!(buffer.was_dirty().unwrap());
    assert!(!buffer.is_clean().unwrap());
}

#[test]
fn test_tagged_truncate_zero_resets() {
    let (buffer, tags) = tagged(2);
    buffer.write_at(0, b"junk").unwrap();
    buffer.begin().unwrap();
    buffer.begin().unwrap();
    assert!(tags.get(2).unwrap());

    buffer.truncate(0).unwrap();
    assert_eq!(buffer.len().unwrap(), 0);
    assert!(!tags.get(2).unwrap());
    assert!(buffer.is_clean().unwrap());
}

#[test]
fn test_tagged_rollback_unsupported() {
    let (buffer, _tags) = tagged(0);
    assert!(!buffer.is_rollback_supported());
    assert!(matches!(buffer.rollback(), Err(PlexError::Unsupported(_))));
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_timed_expires_with_open_transaction() {
    let (buffer, _tags) = tagged(1);
    buffer.begin().unwrap();
    assert!(!buffer.close_timed(Duration::from_millis(50)).unwrap());
    assert!(buffer.is_open());

    buffer.commit().unwrap();
    assert!(buffer.close_timed(Duration::from_millis(50)).unwrap());
    assert!(!buffer.is_open());
}

#[test]
fn test_close_waits_for_inflight_transaction() {
    let tags = tag_bitlist();
    let buffer = Arc::new(TaggedTxBuffer::new(MemBuffer::new(), tags, 0));
    buffer.begin().unwrap();

    let closer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            buffer.close().unwrap();
        })
    };

    // Give the closer time to block on the open transaction.
    thread::sleep(Duration::from_millis(50));
    assert!(buffer.is_open());

    buffer.commit().unwrap();
    closer.join().unwrap();
    assert!(!buffer.is_open());
}
