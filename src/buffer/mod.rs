//! FileBuffer Module
//!
//! Abstract random-access byte container with interchangeable backends.
//!
//! ## Responsibilities
//! - Positional read/write without a shared cursor
//! - Size, shrink-only truncate, flush, close
//! - An advisory read/write/upgradable lock per buffer
//!
//! ## Backends
//! - [`DiskBuffer`] — portable file-descriptor implementation
//! - [`MappedBuffer`] — memory-mapped implementation over the same contract
//! - [`MemBuffer`] — heap-backed volatile implementation
//! - [`ReadOnlyBuffer`] — wrapper rejecting all mutation

mod disk;
mod lock;
mod mapped;
mod mem;
mod read_only;

pub use disk::DiskBuffer;
pub use lock::{BufferLock, ReadGuard, UpgradableGuard, WriteGuard};
pub use mapped::MappedBuffer;
pub use mem::MemBuffer;
pub use read_only::ReadOnlyBuffer;

use crate::error::Result;

/// A linear byte-addressable medium.
///
/// Every method is safe to call from multiple threads: implementations make
/// each individual call atomic with respect to the others. The [`BufferLock`]
/// returned by [`lock`](FileBuffer::lock) is *advisory* — it is never taken by
/// the buffer's own single-call operations, and exists so callers can make
/// multi-step sequences (read-modify-write, check-then-truncate) atomic.
///
/// Reads past the current end return fewer bytes than requested (possibly 0);
/// writes past the current end grow the buffer, with any gap reading as zero.
pub trait FileBuffer: Send + Sync {
    /// Read up to `dst.len()` bytes starting at `pos`. Returns the number of
    /// bytes read; 0 means `pos` is at or past the end.
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize>;

    /// Write `src` starting at `pos`, growing the buffer if needed.
    /// Returns the number of bytes written (the full `src.len()` on success).
    fn write_at(&self, pos: u64, src: &[u8]) -> Result<usize>;

    /// Read the single byte at `pos`; `None` at or past the end.
    fn read_byte_at(&self, pos: u64) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read_at(pos, &mut b)? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    /// Write a single byte at `pos`, growing the buffer if needed.
    fn write_byte_at(&self, pos: u64, value: u8) -> Result<()> {
        self.write_at(pos, &[value])?;
        Ok(())
    }

    /// Current size in bytes.
    fn len(&self) -> Result<u64>;

    /// True if the buffer holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink the buffer to `new_len` bytes. A `new_len` at or beyond the
    /// current size is a no-op; only shrinking is defined.
    fn truncate(&self, new_len: u64) -> Result<()>;

    /// The advisory lock callers use to coordinate compound operations.
    fn lock(&self) -> &BufferLock;

    /// Flush buffered state to the underlying medium.
    fn force(&self) -> Result<()>;

    /// True if mutation is rejected.
    fn is_read_only(&self) -> bool;

    /// True until `close` has been called.
    fn is_open(&self) -> bool;

    /// Close the buffer. Later operations fail with `Closed`.
    fn close(&self) -> Result<()>;
}
