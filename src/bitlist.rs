//! Bitlist Module
//!
//! Bit-addressable allocation bitmap layered on one FileBuffer.
//!
//! ## Responsibilities
//! - Set/clear/test a single bit
//! - Linear scans for the first set or clear bit at or after a start index
//! - Aggregate set/clear counts
//!
//! Bit `i` lives in byte `i / 8`, most significant bit first. A bit beyond the
//! current end of the backing buffer reads as clear; setting such a bit grows
//! the buffer, with every gap byte reading as zero.

use std::sync::Arc;

use crate::buffer::{BufferLock, FileBuffer};
use crate::error::Result;

/// Bytes read per scan step.
const SCAN_CHUNK: usize = 512;

/// Mask selecting bit `index` inside its byte (MSB first).
pub(crate) const fn bit_mask(index: u64) -> u8 {
    0x80 >> (index % 8)
}

/// Index of the first set bit of a nonzero byte, MSB first.
pub(crate) const fn first_set_in_byte(byte: u8) -> u64 {
    byte.leading_zeros() as u64
}

/// Index of the first clear bit of a non-0xFF byte, MSB first.
pub(crate) const fn first_clear_in_byte(byte: u8) -> u64 {
    (!byte).leading_zeros() as u64
}

/// Boolean array keyed by bit index, persisted in a FileBuffer.
pub struct Bitlist {
    buffer: Arc<dyn FileBuffer>,
    /// Read-modify-write coordination for set/clear. The buffer's own per-call
    /// atomicity covers single reads and writes; this lock closes the window
    /// between the read and the write of one byte.
    lock: BufferLock,
}

impl Bitlist {
    pub fn new(buffer: Arc<dyn FileBuffer>) -> Self {
        Self {
            buffer,
            lock: BufferLock::new(),
        }
    }

    /// The backing buffer.
    pub fn buffer(&self) -> &Arc<dyn FileBuffer> {
        &self.buffer
    }

    /// Set bit `index`. After this returns, `get(index)` is true until a
    /// subsequent `clear(index)`.
    pub fn set(&self, index: u64) -> Result<()> {
        let pos = index / 8;
        let mask = bit_mask(index);
        let guard = self.lock.upgradable_read();
        let byte = self.buffer.read_byte_at(pos)?.unwrap_or(0);
        if byte & mask == 0 {
            let _write = BufferLock::upgrade(guard);
            self.buffer.write_byte_at(pos, byte | mask)?;
        }
        Ok(())
    }

    /// Clear bit `index`.
    pub fn clear(&self, index: u64) -> Result<()> {
        let pos = index / 8;
        let mask = bit_mask(index);
        let guard = self.lock.upgradable_read();
        let byte = match self.buffer.read_byte_at(pos)? {
            Some(b) => b,
            // Beyond the end: already clear.
            None => return Ok(()),
        };
        if byte & mask != 0 {
            let _write = BufferLock::upgrade(guard);
            self.buffer.write_byte_at(pos, byte & !mask)?;
        }
        Ok(())
    }

    /// Test bit `index`.
    pub fn get(&self, index: u64) -> Result<bool> {
        let _read = self.lock.read();
        let byte = self.buffer.read_byte_at(index / 8)?.unwrap_or(0);
        Ok(byte & bit_mask(index) != 0)
    }

    /// First set bit at or after `start`, or `None` if no set bit remains.
    pub fn find_first_set(&self, start: u64) -> Result<Option<u64>> {
        let _read = self.lock.read();
        let mut chunk = [0u8; SCAN_CHUNK];
        let mut byte_pos = start / 8;
        // Bits of the first byte below `start` must never be reported.
        let mut head_mask = 0xFFu8 >> (start % 8);
        loop {
            let n = self.buffer.read_at(byte_pos, &mut chunk)?;
            if n == 0 {
                return Ok(None);
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
    }

    /// First clear bit at or after `start`. Bits beyond the end of the backing
    /// buffer read as clear, so this always finds an answer.
    pub fn find_first_clear(&self, start: u64) -> Result<Option<u64>> {
        let _read = self.lock.read();
        let mut chunk = [0u8; SCAN_CHUNK];
        let mut byte_pos = start / 8;
        // Bits of the first byte below `start` are treated as set.
        let mut head_bits = !(0xFFu8 >> (start % 8));
        loop {
            let n = self.buffer.read_at(byte_pos, &mut chunk)?;
            for (i, &raw) in chunk[..n].iter().enumerate() {
                let byte = raw | head_bits;
                head_bits = 0;
                if byte != 0xFF {
                    return Ok(Some((byte_pos + i as u64) * 8 + first_clear_in_byte(byte)));
                }
            }
            if n < chunk.len() {
                // Ran off the stored bytes; the next bit position is clear.
                let past_end = (byte_pos + n as u64) * 8;
                return Ok(Some(past_end.max(start)));
            }
            byte_pos += n as u64;
        }
    }

    /// Number of set bits over the whole backing buffer.
    pub fn count_set_bits(&self) -> Result<u64> {
        let _read = self.lock.read();
        let mut chunk = [0u8; SCAN_CHUNK];
        let mut pos = 0u64;
        let mut count = 0u64;
        loop {
            let n = self.buffer.read_at(pos, &mut chunk)?;
            if n == 0 {
                return Ok(count);
            }
            count += chunk[..n].iter().map(|b| u64::from(b.count_ones())).sum::<u64>();
            pos += n as u64;
        }
    }

    /// Number of clear bits within the current extent of the backing buffer.
    pub fn count_clear_bits(&self) -> Result<u64> {
        let total = self.buffer.len()? * 8;
        Ok(total - self.count_set_bits()?)
    }
}
