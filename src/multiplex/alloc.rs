//! Block Allocator
//!
//! First-fit block allocation over the free bitmap, with a total-blocks
//! counter for extending the store and a lowest-free-block hint to avoid
//! rescanning. All functions here run with the allocator lock held; the
//! header counters are mutated nowhere else.
//!
//! The free bitmap is itself a multiplexed file (bit set = block free; bit 0
//! unused since block 0 is the absent sentinel). Setting a bit can grow the
//! bitmap and so may itself allocate — that recursion bottoms out because
//! clearing a set bit never can.

use tracing::trace;

use crate::bitlist::{bit_mask, first_set_in_byte};
use crate::error::{PlexError, Result};

use super::scaled::put_scaled;
use super::tree::{HeldAlloc, NoAlloc};
use super::{AllocState, Loc, MuxCore};

/// Bytes of bitmap examined per scan step.
const SCAN_CHUNK: usize = 256;

impl MuxCore {
    /// Allocate one block: reuse the lowest free block if any is known,
    /// otherwise carve a fresh block id out of the backing store.
    pub(crate) fn alloc_block_locked(&self, state: &mut AllocState) -> Result<u64> {
        if state.free_hint != 0 {
            if let Some(id) = self.bitmap_find_set_locked(state.free_hint)? {
                self.bitmap_clear_locked(id)?;
                state.free_hint = self.bitmap_find_set_locked(id + 1)?.unwrap_or(0);
                self.write_counters_locked(state)?;
                trace!(block = id, "reused freed block");
                return Ok(id);
            }
            state.free_hint = 0;
        }
        if state.total_blocks >= self.geom.max_block_id {
            return Err(PlexError::OutOfBounds {
                pos: state.total_blocks + 1,
                max: self.geom.max_block_id,
            });
        }
        state.total_blocks += 1;
        let id = state.total_blocks;
        self.write_counters_locked(state)?;
        trace!(block = id, "extended block range");
        Ok(id)
    }

    /// Return a block to the free pool.
    pub(crate) fn free_block_locked(&self, state: &mut AllocState, id: u64) -> Result<()> {
        if id == 0 {
            return Err(PlexError::Corrupt(
                "attempt to free reserved block 0".to_string(),
            ));
        }
        self.bitmap_set_locked(state, id)?;
        if state.free_hint == 0 || id < state.free_hint {
            state.free_hint = id;
        }
        self.write_counters_locked(state)?;
        self.invalidate_node(id);
        trace!(block = id, "freed block");
        Ok(())
    }

    /// Persist the counter pair (total blocks, free hint) into the header.
    fn write_counters_locked(&self, state: &AllocState) -> Result<()> {
        let scale = self.geom.block_id_scale as usize;
        let mut counters = [0u8; 16];
        put_scaled(state.total_blocks, &mut counters[..scale]);
        put_scaled(state.free_hint, &mut counters[scale..2 * scale]);
        self.backing
            .write_at(self.geom.counters_offset, &counters[..2 * scale])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Free-bitmap bit operations
    // -------------------------------------------------------------------------

    /// Mark block `id` free. May grow the bitmap file, drawing any block it
    /// needs from the state already held.
    fn bitmap_set_locked(&self, state: &mut AllocState, id: u64) -> Result<()> {
        let pos = id / 8;
        let mask = bit_mask(id);
        let mut byte = [0u8; 1];
        self.read_file(Loc::Bitmap, pos, &mut byte)?;
        if byte[0] & mask == 0 {
            self.write_file(Loc::Bitmap, &mut HeldAlloc(state), pos, &[byte[0] | mask])?;
        }
        Ok(())
    }

    /// Mark block `id` in use. The bit being set implies its byte was written
    /// before, so this path never allocates.
    fn bitmap_clear_locked(&self, id: u64) -> Result<()> {
        let pos = id / 8;
        let mask = bit_mask(id);
        let mut byte = [0u8; 1];
        self.read_file(Loc::Bitmap, pos, &mut byte)?;
        if byte[0] & mask != 0 {
            self.write_file(Loc::Bitmap, &mut NoAlloc, pos, &[byte[0] & !mask])?;
        }
        Ok(())
    }

    /// Lowest free block id at or after `start`, or `None`.
    fn bitmap_find_set_locked(&self, start: u64) -> Result<Option<u64>> {
        let mut chunk = [0u8; SCAN_CHUNK];
        let bitmap_len = self.file_length(Loc::Bitmap)?;
        let mut byte_pos = start / 8;
        let mut head_mask = 0xFFu8 >> (start % 8);
        while byte_pos < bitmap_len {
            let want = SCAN_CHUNK.min((bitmap_len - byte_pos) as usize);
            let n = self.read_file(Loc::Bitmap, byte_pos, &mut chunk[..want])?;
            if n == 0 {
                break;
            }
            for (i, &raw) in chunk[..n].iter().enumerate() {
                let byte = raw & head_mask;
                head_mask = 0xFF;
                if byte != 0 {
                    return Ok(Some((byte_pos + i as u64) * 8 + first_set_in_byte(byte)));
                }
            }
            byte_pos += n as u64;
        }
        Ok(None)
    }
}
