//! Address Tree
//!
//! Recursive descent over per-file indirect-block trees. A file of length L
//! is addressed by a tree of `levels(L)` index levels; level 0 is the data
//! block itself. Absent subtrees (child id 0) read as zeros and are
//! materialized lazily on write.

use crate::error::{PlexError, Result};

use super::scaled::{get_scaled, put_scaled};
use super::{AllocState, MuxCore};

/// Where a tree mutation gets fresh blocks from.
///
/// Growing the free bitmap can itself demand a block while the allocator lock
/// is already held, so the write path is parameterized instead of always
/// taking the lock.
pub(crate) trait AllocSource {
    fn alloc(&mut self, core: &MuxCore) -> Result<u64>;
}

/// Take the allocator lock per allocation (the normal path).
pub(crate) struct LockAlloc;

impl AllocSource for LockAlloc {
    fn alloc(&mut self, core: &MuxCore) -> Result<u64> {
        let mut state = core.alloc.lock();
        core.alloc_block_locked(&mut state)
    }
}

/// Reuse allocator state the caller already holds (bitmap growth during
/// alloc/free).
pub(crate) struct HeldAlloc<'a>(pub &'a mut AllocState);

impl AllocSource for HeldAlloc<'_> {
    fn alloc(&mut self, core: &MuxCore) -> Result<u64> {
        core.alloc_block_locked(self.0)
    }
}

/// Paths that must never allocate (clearing a set bit only touches bytes
/// whose blocks already exist).
pub(crate) struct NoAlloc;

impl AllocSource for NoAlloc {
    fn alloc(&mut self, _core: &MuxCore) -> Result<u64> {
        Err(PlexError::Corrupt(
            "block allocation on a non-allocating path".to_string(),
        ))
    }
}

/// Result of a partial tree truncation.
pub(crate) struct TruncateOutcome {
    /// Blocks released by this subtree walk.
    pub freed: u64,
    /// True when the whole subtree (node included) was freed, telling the
    /// parent to clear its child pointer.
    pub fully_freed: bool,
}

impl MuxCore {
    // -------------------------------------------------------------------------
    // Node access (through the LRU cache)
    // -------------------------------------------------------------------------

    /// Read block `id` raw, zero-extending past the physical end (a block
    /// carved out by the counter may not have been written yet).
    pub(crate) fn read_block_raw(&self, id: u64, offset: u64, dst: &mut [u8]) -> Result<()> {
        let n = self
            .backing
            .read_at(self.geom.block_offset(id) + offset, dst)?;
        dst[n..].fill(0);
        Ok(())
    }

    /// Child pointer `slot` of index node `node`.
    pub(crate) fn child_at(&self, node: u64, slot: usize) -> Result<u64> {
        let scale = self.geom.block_id_scale as usize;
        let range = slot * scale..(slot + 1) * scale;
        if let Some(bytes) = self.nodes.lock().get(node) {
            return Ok(get_scaled(&bytes[range]));
        }
        let mut bytes = vec![0u8; self.geom.block_size as usize];
        self.read_block_raw(node, 0, &mut bytes)?;
        let child = get_scaled(&bytes[range.clone()]);
        self.nodes.lock().insert(node, bytes);
        Ok(child)
    }

    /// Write child pointer `slot` of index node `node`, keeping any cached
    /// copy coherent.
    pub(crate) fn set_child(&self, node: u64, slot: usize, child: u64) -> Result<()> {
        let scale = self.geom.block_id_scale as usize;
        let mut encoded = [0u8; 8];
        put_scaled(child, &mut encoded[..scale]);
        self.backing.write_at(
            self.geom.block_offset(node) + (slot * scale) as u64,
            &encoded[..scale],
        )?;
        self.nodes.lock().update(node, slot * scale, &encoded[..scale]);
        Ok(())
    }

    /// Zero a freshly allocated block before linking it anywhere.
    pub(crate) fn clear_block(&self, id: u64) -> Result<()> {
        let zeros = vec![0u8; self.geom.block_size as usize];
        self.backing.write_at(self.geom.block_offset(id), &zeros)?;
        self.nodes.lock().remove(id);
        Ok(())
    }

    pub(crate) fn invalidate_node(&self, id: u64) {
        self.nodes.lock().remove(id);
    }

    // -------------------------------------------------------------------------
    // Tree walks
    // -------------------------------------------------------------------------

    /// Read `dst.len()` bytes at `pos` within the subtree rooted at `node`
    /// (`level` index levels above the data). Absent subtrees read as zeros.
    pub(crate) fn tree_read(
        &self,
        node: u64,
        level: usize,
        pos: u64,
        dst: &mut [u8],
    ) -> Result<()> {
        if node == 0 {
            dst.fill(0);
            return Ok(());
        }
        if level == 0 {
            return self.read_block_raw(node, pos, dst);
        }
        let span = self.geom.level_max_sizes[level - 1];
        let mut pos = pos;
        let mut rest = dst;
        while !rest.is_empty() {
            let slot = (pos / span) as usize;
            let within = pos % span;
            let take = ((span - within).min(rest.len() as u64)) as usize;
            let (head, tail) = rest.split_at_mut(take);
            let child = self.child_at(node, slot)?;
            self.tree_read(child, level - 1, within, head)?;
            rest = tail;
            pos += take as u64;
        }
        Ok(())
    }

    /// Write `src` at `pos` within the subtree rooted at `node`, allocating
    /// missing index and data blocks along the path. New index blocks are
    /// always cleared; a new data block is cleared only when the write covers
    /// it partially (a fully covered block needs no scrub).
    pub(crate) fn tree_write(
        &self,
        alloc: &mut dyn AllocSource,
        node: u64,
        level: usize,
        pos: u64,
        src: &[u8],
    ) -> Result<()> {
        debug_assert_ne!(node, 0);
        if level == 0 {
            self.backing
                .write_at(self.geom.block_offset(node) + pos, src)?;
            return Ok(());
        }
        let span = self.geom.level_max_sizes[level - 1];
        let block_size = u64::from(self.geom.block_size);
        let mut pos = pos;
        let mut rest = src;
        while !rest.is_empty() {
            let slot = (pos / span) as usize;
            let within = pos % span;
            let take = ((span - within).min(rest.len() as u64)) as usize;
            let (head, tail) = rest.split_at(take);
            let mut child = self.child_at(node, slot)?;
            if child == 0 {
                child = alloc.alloc(self)?;
                let is_index = level > 1;
                let partial_data = !is_index && !(within == 0 && take as u64 == block_size);
                if is_index || partial_data {
                    self.clear_block(child)?;
                }
                self.set_child(node, slot, child)?;
            }
            self.tree_write(alloc, child, level - 1, within, head)?;
            rest = tail;
            pos += take as u64;
        }
        Ok(())
    }

    /// Write zeros over `[pos, pos + len)` touching only blocks that already
    /// exist; fully sparse stretches are skipped without allocating.
    pub(crate) fn tree_zero(&self, node: u64, level: usize, pos: u64, len: u64) -> Result<()> {
        if node == 0 || len == 0 {
            return Ok(());
        }
        if level == 0 {
            let zeros = vec![0u8; len as usize];
            self.backing
                .write_at(self.geom.block_offset(node) + pos, &zeros)?;
            return Ok(());
        }
        let span = self.geom.level_max_sizes[level - 1];
        let mut pos = pos;
        let mut remaining = len;
        while remaining > 0 {
            let slot = (pos / span) as usize;
            let within = pos % span;
            let take = (span - within).min(remaining);
            let child = self.child_at(node, slot)?;
            self.tree_zero(child, level - 1, within, take)?;
            pos += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Free the whole subtree rooted at `node`. Returns the number of blocks
    /// released.
    pub(crate) fn tree_free(&self, state: &mut AllocState, node: u64, level: usize) -> Result<u64> {
        if node == 0 {
            return Ok(0);
        }
        let mut freed = 0;
        if level > 0 {
            for slot in 0..self.geom.ids_per_block as usize {
                let child = self.child_at(node, slot)?;
                freed += self.tree_free(state, child, level - 1)?;
            }
        }
        self.free_block_locked(state, node)?;
        Ok(freed + 1)
    }

    /// Shrink the subtree rooted at `node` to its first `keep` data blocks.
    ///
    /// A subtree asked to keep nothing is freed whole and reports
    /// `fully_freed`, telling the parent to clear the child pointer; a
    /// surviving subtree keeps its node with freed children zeroed out.
    pub(crate) fn tree_truncate(
        &self,
        state: &mut AllocState,
        node: u64,
        level: usize,
        keep: u64,
    ) -> Result<TruncateOutcome> {
        if node == 0 {
            return Ok(TruncateOutcome {
                freed: 0,
                fully_freed: true,
            });
        }
        if keep == 0 {
            let freed = self.tree_free(state, node, level)?;
            return Ok(TruncateOutcome {
                freed,
                fully_freed: true,
            });
        }
        if level == 0 {
            // keep >= 1: this data block survives.
            return Ok(TruncateOutcome {
                freed: 0,
                fully_freed: false,
            });
        }
        let capacity = self.geom.child_capacity(level);
        let mut freed = 0;
        for slot in 0..self.geom.ids_per_block as usize {
            let start = (slot as u64).saturating_mul(capacity);
            let child_keep = keep.saturating_sub(start).min(capacity);
            if child_keep == capacity {
                continue;
            }
            let child = self.child_at(node, slot)?;
            if child == 0 {
                continue;
            }
            let outcome = self.tree_truncate(state, child, level - 1, child_keep)?;
            freed += outcome.freed;
            if outcome.fully_freed {
                self.set_child(node, slot, 0)?;
            }
        }
        Ok(TruncateOutcome {
            freed,
            fully_freed: false,
        })
    }
}
