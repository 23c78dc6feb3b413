//! Tests for the MultiplexFile engine
//!
//! These tests verify:
//! - Geometry validation at creation
//! - Round trips through arbitrary, overlapping, cross-block writes
//! - Sparse growth without interior allocation
//! - Truncation, including the exact lengths where the tree height changes
//! - First-fit reuse of freed blocks
//! - Persistence across reopen

use std::path::PathBuf;
use std::sync::Arc;

use plexfile::{
    DiskBuffer, FileBuffer, MemBuffer, MultiplexFile, NonTxBuffer, PlexError, StoreOptions,
    TxFileBuffer,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Small-geometry store over memory: 64-byte blocks, 2-byte ids and lengths.
/// Index blocks hold 32 children, so tree heights flip at 64 and 2048 bytes.
fn small_options() -> StoreOptions {
    StoreOptions::builder()
        .block_size(64)
        .block_id_scale(2)
        .length_scale(2)
        .build()
}

fn mem_store(options: &StoreOptions) -> MultiplexFile {
    let backing = Arc::new(NonTxBuffer::new(MemBuffer::new())) as Arc<dyn TxFileBuffer>;
    MultiplexFile::create(backing, options).unwrap()
}

fn setup_disk_store(name: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(name);
    (temp_dir, path)
}

fn disk_backing(path: &PathBuf) -> Arc<dyn TxFileBuffer> {
    Arc::new(NonTxBuffer::new(DiskBuffer::open(path).unwrap()))
}

fn read_vec(file: &dyn FileBuffer, pos: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    file.read_at(pos, &mut out).unwrap();
    out
}

// =============================================================================
// Geometry Tests
// =============================================================================

#[test]
fn test_geometry_validation() {
    let backing = || Arc::new(NonTxBuffer::new(MemBuffer::new())) as Arc<dyn TxFileBuffer>;
    let bad = [
        StoreOptions::builder().block_id_scale(0).build(),
        StoreOptions::builder().block_id_scale(9).build(),
        StoreOptions::builder().length_scale(9).build(),
        // Too small for two child pointers.
        StoreOptions::builder().block_size(6).block_id_scale(4).build(),
        // Not a multiple of the id scale.
        StoreOptions::builder().block_size(10).block_id_scale(4).build(),
    ];
    for options in bad {
        assert!(matches!(
            MultiplexFile::create(backing(), &options),
            Err(PlexError::Geometry(_))
        ));
    }
}

#[test]
fn test_accessors() {
    let store = mem_store(&small_options());
    assert_eq!(store.block_size(), 64);
    assert_eq!(store.block_id_scale(), 2);
    assert_eq!(store.length_scale(), 2);
    // 2-byte lengths bias by one, so the cap sits just under 2^16.
    assert_eq!(store.max_file_length(), 65534);
    assert_eq!(store.block_count(), 0);
}

#[test]
fn test_open_rejects_garbage() {
    let backing = Arc::new(NonTxBuffer::new(MemBuffer::new())) as Arc<dyn TxFileBuffer>;
    backing.write_at(0, b"GARBAGE_NOT_A_STORE_HEADER").unwrap();
    assert!(matches!(
        MultiplexFile::open(backing, 0),
        Err(PlexError::Corrupt(_))
    ));
}

// =============================================================================
// Concrete Scenario
// =============================================================================

#[test]
fn test_write_grow_truncate_scenario() {
    let store = mem_store(&small_options());
    let file = store.open_file(5).unwrap();

    // Ten bytes of 0xAB at the start.
    file.write_at(0, &[0xAB; 10]).unwrap();
    assert_eq!(file.len().unwrap(), 10);

    // One byte far past the end.
    file.write_at(200, &[0xCD]).unwrap();
    assert_eq!(file.len().unwrap(), 201);

    // The gap reads as zero; both written regions survive.
    assert_eq!(read_vec(&file, 0, 10), vec![0xAB; 10]);
    assert_eq!(read_vec(&file, 10, 190), vec![0u8; 190]);
    assert_eq!(read_vec(&file, 200, 1), vec![0xCD]);

    // Shrink back below the first write.
    file.truncate(5).unwrap();
    assert_eq!(file.len().unwrap(), 5);
    assert_eq!(read_vec(&file, 0, 5), vec![0xAB; 5]);
    let mut past = [0u8; 4];
    assert_eq!(file.read_at(5, &mut past).unwrap(), 0);
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_overlapping_writes_round_trip() {
    let store = mem_store(&small_options());
    let file = store.open_file(2).unwrap();
    let mut expected = vec![0u8; 400];

    let writes: [(u64, Vec<u8>); 4] = [
        (10, vec![0x11; 100]),
        (50, vec![0x22; 120]),
        (0, vec![0x33; 5]),
        (300, vec![0x44; 100]),
    ];
    for (pos, data) in &writes {
        file.write_at(*pos, data).unwrap();
        let pos = *pos as usize;
        expected[pos..pos + data.len()].copy_from_slice(data);
    }

    assert_eq!(file.len().unwrap(), 400);
    assert_eq!(read_vec(&file, 0, 400), expected);
}

#[test]
fn test_cross_block_reads_and_writes() {
    let store = mem_store(&small_options());
    let file = store.open_file(1).unwrap();

    // A write spanning several 64-byte blocks with a distinctive pattern.
    let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
    file.write_at(30, &data).unwrap();

    assert_eq!(read_vec(&file, 30, 500), data);
    // Unwritten head reads as zero.
    assert_eq!(read_vec(&file, 0, 30), vec![0u8; 30]);
    // A read crossing the end comes back short.
    let mut tail = [0u8; 100];
    assert_eq!(file.read_at(500, &mut tail).unwrap(), 30);
}

#[test]
fn test_independent_files_do_not_interfere() {
    let store = mem_store(&small_options());
    let a = store.open_file(1).unwrap();
    let b = store.open_file(9).unwrap();

    a.write_at(0, &[0xAA; 100]).unwrap();
    b.write_at(0, &[0xBB; 150]).unwrap();
    a.write_at(100, &[0xA1; 50]).unwrap();

    assert_eq!(a.len().unwrap(), 150);
    assert_eq!(b.len().unwrap(), 150);
    assert_eq!(read_vec(&a, 0, 100), vec![0xAA; 100]);
    assert_eq!(read_vec(&a, 100, 50), vec![0xA1; 50]);
    assert_eq!(read_vec(&b, 0, 150), vec![0xBB; 150]);
}

// =============================================================================
// Sparse Growth Tests
// =============================================================================

#[test]
fn test_sparse_write_skips_interior_blocks() {
    let store = mem_store(&small_options());
    let file = store.open_file(5).unwrap();

    // One byte in block 100 of the file. A dense layout would need a
    // hundred data blocks; the tree path needs a handful.
    file.write_at(100 * 64, &[0x77]).unwrap();
    assert_eq!(file.len().unwrap(), 100 * 64 + 1);
    assert!(
        store.block_count() < 10,
        "sparse write allocated {} blocks",
        store.block_count()
    );

    // Every interior offset reads as zero.
    for pos in [0u64, 63, 64, 1000, 2048, 6300] {
        assert_eq!(read_vec(&file, pos, 1), vec![0]);
    }
    assert_eq!(read_vec(&file, 6400, 1), vec![0x77]);
}

#[test]
fn test_max_file_length_enforced() {
    let store = mem_store(&small_options());
    let file = store.open_file(1).unwrap();
    let max = store.max_file_length();

    assert!(matches!(
        file.write_at(max, &[1]),
        Err(PlexError::OutOfBounds { .. })
    ));
    file.write_at(max - 1, &[1]).unwrap();
    assert_eq!(file.len().unwrap(), max);
}

// =============================================================================
// Truncate Tests
// =============================================================================

#[test]
fn test_truncate_is_idempotent() {
    let store = mem_store(&small_options());
    let file = store.open_file(3).unwrap();
    let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    file.write_at(0, &data).unwrap();

    file.truncate(100).unwrap();
    let after_once = (
        file.len().unwrap(),
        read_vec(&file, 0, 100),
        store.block_count(),
    );

    file.truncate(100).unwrap();
    let after_twice = (
        file.len().unwrap(),
        read_vec(&file, 0, 100),
        store.block_count(),
    );

    assert_eq!(after_once, after_twice);
    assert_eq!(after_once.1, data[..100]);
}

#[test]
fn test_truncate_to_zero_forgets_content() {
    let store = mem_store(&small_options());
    let file = store.open_file(3).unwrap();
    file.write_at(0, &[0xEE; 500]).unwrap();

    file.truncate(0).unwrap();
    assert_eq!(file.len().unwrap(), 0);

    // A fresh write sees no memory of the old bytes.
    file.write_at(10, &[0x55; 20]).unwrap();
    assert_eq!(file.len().unwrap(), 30);
    assert_eq!(read_vec(&file, 0, 10), vec![0u8; 10]);
    assert_eq!(read_vec(&file, 10, 20), vec![0x55; 20]);
}

#[test]
fn test_truncate_larger_is_noop() {
    let store = mem_store(&small_options());
    let file = store.open_file(1).unwrap();
    file.write_at(0, &[7; 40]).unwrap();
    file.truncate(1000).unwrap();
    assert_eq!(file.len().unwrap(), 40);
}

/// Tree height changes at exactly 64 (one block) and 2048 (one index level)
/// bytes with this geometry; exercise truncation across both boundaries.
#[test]
fn test_truncate_across_height_transitions() {
    let store = mem_store(&small_options());
    let file = store.open_file(1).unwrap();
    let data: Vec<u8> = (0..2100u32).map(|i| (i % 251) as u8).collect();
    file.write_at(0, &data).unwrap();

    // Two index levels down to one: 2100 -> 2048.
    file.truncate(2048).unwrap();
    assert_eq!(file.len().unwrap(), 2048);
    assert_eq!(read_vec(&file, 0, 2048), data[..2048]);

    // Just past the single-block boundary.
    file.truncate(65).unwrap();
    assert_eq!(file.len().unwrap(), 65);
    assert_eq!(read_vec(&file, 0, 65), data[..65]);

    // One index level down to none: 65 -> 64.
    file.truncate(64).unwrap();
    assert_eq!(file.len().unwrap(), 64);
    assert_eq!(read_vec(&file, 0, 64), data[..64]);

    // Within the last remaining block.
    file.truncate(63).unwrap();
    assert_eq!(file.len().unwrap(), 63);
    assert_eq!(read_vec(&file, 0, 63), data[..63]);

    // Regrowing after the shrink exposes no stale bytes.
    file.write_at(100, &[0x99]).unwrap();
    assert_eq!(read_vec(&file, 63, 37), vec![0u8; 37]);
    assert_eq!(read_vec(&file, 100, 1), vec![0x99]);
}

#[test]
fn test_truncate_sparse_file_with_empty_low_range() {
    let store = mem_store(&small_options());
    let file = store.open_file(1).unwrap();

    // Only block 100 exists; everything under the shrunken length is sparse.
    file.write_at(100 * 64, &[0x42]).unwrap();
    file.truncate(100).unwrap();
    assert_eq!(file.len().unwrap(), 100);
    assert_eq!(read_vec(&file, 0, 100), vec![0u8; 100]);

    file.write_at(50, &[0x24]).unwrap();
    assert_eq!(read_vec(&file, 50, 1), vec![0x24]);
}

// =============================================================================
// Allocator Tests
// =============================================================================

#[test]
fn test_freed_blocks_are_reused_first_fit() {
    let store = mem_store(&small_options());

    let file = store.open_file(1).unwrap();
    file.write_at(0, &[0x31; 192]).unwrap();
    store.delete_file(1).unwrap();
    let after_delete = store.block_count();

    // Rebuilding a file of the same shape draws every block from the free
    // list: the total never advances.
    let file = store.open_file(1).unwrap();
    file.write_at(0, &[0x32; 192]).unwrap();
    assert_eq!(store.block_count(), after_delete);
    assert_eq!(read_vec(&file, 0, 192), vec![0x32; 192]);
}

#[test]
fn test_delete_file_clears_state() {
    let store = mem_store(&small_options());
    let file = store.open_file(4).unwrap();
    file.write_at(0, &[1; 300]).unwrap();

    store.delete_file(4).unwrap();
    let file = store.open_file(4).unwrap();
    assert_eq!(file.len().unwrap(), 0);
    assert_eq!(read_vec(&file, 0, 10), vec![0u8; 10]);
}

// =============================================================================
// File Count Tests
// =============================================================================

#[test]
fn test_file_count_grows_on_open() {
    let store = mem_store(&small_options());
    assert_eq!(store.file_count().unwrap(), 0);

    store.open_file(0).unwrap();
    assert_eq!(store.file_count().unwrap(), 1);

    store.open_file(5).unwrap();
    assert_eq!(store.file_count().unwrap(), 6);

    // Reopening an existing id changes nothing.
    store.open_file(3).unwrap();
    assert_eq!(store.file_count().unwrap(), 6);
}

#[test]
fn test_truncate_file_count() {
    let store = mem_store(&small_options());
    for id in 0..6 {
        let file = store.open_file(id).unwrap();
        file.write_at(0, &[id as u8; 32]).unwrap();
    }
    assert_eq!(store.file_count().unwrap(), 6);

    store.truncate_file_count(2).unwrap();
    assert_eq!(store.file_count().unwrap(), 2);

    // Survivors keep their data; reopened victims are empty.
    assert_eq!(read_vec(&store.open_file(1).unwrap(), 0, 32), vec![1u8; 32]);
    assert_eq!(store.open_file(4).unwrap().len().unwrap(), 0);
}

// =============================================================================
// Zero Length-Scale Tests
// =============================================================================

#[test]
fn test_zero_length_scale_single_block_files() {
    let options = StoreOptions::builder()
        .block_size(64)
        .block_id_scale(2)
        .length_scale(0)
        .build();
    let store = mem_store(&options);
    assert_eq!(store.max_file_length(), 64);

    let file = store.open_file(1).unwrap();
    assert_eq!(file.len().unwrap(), 0);

    // Any write claims the whole block.
    file.write_at(0, &[0xAB; 10]).unwrap();
    assert_eq!(file.len().unwrap(), 64);
    assert_eq!(read_vec(&file, 0, 10), vec![0xAB; 10]);
    assert_eq!(read_vec(&file, 10, 54), vec![0u8; 54]);

    // Nothing may reach past the single block.
    assert!(matches!(
        file.write_at(60, &[1; 5]),
        Err(PlexError::OutOfBounds { .. })
    ));

    file.truncate(0).unwrap();
    assert_eq!(file.len().unwrap(), 0);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_store_persists_across_reopen() {
    let (_temp, path) = setup_disk_store("store.mpx");
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let block_count = {
        let store = MultiplexFile::create(disk_backing(&path), &small_options()).unwrap();
        let file = store.open_file(7).unwrap();
        file.write_at(0, &data).unwrap();
        file.write_at(5000, &[0x66; 10]).unwrap();
        store.force().unwrap();
        store.block_count()
    };

    let store = MultiplexFile::open(disk_backing(&path), 0).unwrap();
    assert_eq!(store.block_size(), 64);
    assert_eq!(store.block_count(), block_count);
    assert_eq!(store.file_count().unwrap(), 8);

    let file = store.open_file(7).unwrap();
    assert_eq!(file.len().unwrap(), 5010);
    assert_eq!(read_vec(&file, 0, 1000), data);
    assert_eq!(read_vec(&file, 5000, 10), vec![0x66; 10]);
    // The gap survives reopen as zeros.
    assert_eq!(read_vec(&file, 3000, 100), vec![0u8; 100]);
}

#[test]
fn test_reserved_prefix_left_untouched() {
    let options = StoreOptions::builder()
        .reserved(32)
        .block_size(64)
        .block_id_scale(2)
        .length_scale(2)
        .build();
    let backing = Arc::new(NonTxBuffer::new(MemBuffer::new())) as Arc<dyn TxFileBuffer>;
    backing.write_at(0, &[0x5A; 32]).unwrap();

    let store = MultiplexFile::create(Arc::clone(&backing), &options).unwrap();
    let file = store.open_file(1).unwrap();
    file.write_at(0, &[1; 100]).unwrap();

    let mut prefix = [0u8; 32];
    backing.read_at(0, &mut prefix).unwrap();
    assert_eq!(prefix, [0x5A; 32]);

    // And the store reopens from behind the prefix.
    let store = MultiplexFile::open(backing, 32).unwrap();
    assert_eq!(store.open_file(1).unwrap().len().unwrap(), 100);
}
