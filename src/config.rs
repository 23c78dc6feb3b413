//! Configuration for a multiplex store
//!
//! Centralized store geometry with sensible defaults and eager validation.

use crate::error::{PlexError, Result};

/// Geometry options for creating a multiplex store.
///
/// All three parameters are fixed for the life of the store and persisted in
/// its header. Opening an existing store ignores the options and reads the
/// geometry back from disk.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    // -------------------------------------------------------------------------
    // Layout Configuration
    // -------------------------------------------------------------------------
    /// Bytes reserved at the start of the backing store for caller use.
    /// The store header begins immediately after this prefix.
    pub reserved: u32,

    /// Size in bytes of one physical block.
    pub block_size: u32,

    // -------------------------------------------------------------------------
    // Encoding Configuration
    // -------------------------------------------------------------------------
    /// Bytes used to encode a block id (1..=8). Bounds the maximum number of
    /// blocks the store can ever hold.
    pub block_id_scale: u8,

    /// Bytes used to encode a file length (0..=8). Bounds the maximum length
    /// of any one logical file. A scale of 0 restricts every file to at most
    /// one block (fixed-width row storage).
    pub length_scale: u8,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reserved: 0,
            block_size: 512,
            block_id_scale: 4,
            length_scale: 4,
        }
    }
}

impl StoreOptions {
    /// Create a new options builder
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    /// Validate the geometry, rejecting impossible parameter combinations
    /// before anything touches disk.
    pub fn validate(&self) -> Result<()> {
        if self.block_id_scale < 1 || self.block_id_scale > 8 {
            return Err(PlexError::Geometry(format!(
                "block id scale must be in 1..=8, got {}",
                self.block_id_scale
            )));
        }
        if self.length_scale > 8 {
            return Err(PlexError::Geometry(format!(
                "length scale must be in 0..=8, got {}",
                self.length_scale
            )));
        }
        // An index block must hold at least two child pointers.
        if u32::from(self.block_id_scale) * 2 > self.block_size {
            return Err(PlexError::Geometry(format!(
                "block size {} cannot hold two block ids of scale {}",
                self.block_size, self.block_id_scale
            )));
        }
        if self.block_size % u32::from(self.block_id_scale) != 0 {
            return Err(PlexError::Geometry(format!(
                "block size {} is not a multiple of block id scale {}",
                self.block_size, self.block_id_scale
            )));
        }
        Ok(())
    }
}

/// Builder for StoreOptions
#[derive(Default)]
pub struct StoreOptionsBuilder {
    options: StoreOptions,
}

impl StoreOptionsBuilder {
    /// Set the reserved prefix length (bytes before the store header)
    pub fn reserved(mut self, bytes: u32) -> Self {
        self.options.reserved = bytes;
        self
    }

    /// Set the physical block size in bytes
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.options.block_size = bytes;
        self
    }

    /// Set the block id scale (1..=8 bytes per block id)
    pub fn block_id_scale(mut self, bytes: u8) -> Self {
        self.options.block_id_scale = bytes;
        self
    }

    /// Set the length scale (0..=8 bytes per file length)
    pub fn length_scale(mut self, bytes: u8) -> Self {
        self.options.length_scale = bytes;
        self
    }

    pub fn build(self) -> StoreOptions {
        self.options
    }
}
