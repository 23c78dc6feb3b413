//! Transaction Module
//!
//! Crash-state tagging over a FileBuffer.
//!
//! ## Responsibilities
//! - begin/commit nesting around physical mutations
//! - A persistent "dirty" tag so recovery can detect a process that died
//!   mid-transaction (detection only — there is no undo)
//!
//! Two policies:
//! - [`NonTxBuffer`] — pass-through; exists purely to satisfy the contract
//! - [`TaggedTxBuffer`] — dirty bit in an external [`Bitlist`](crate::Bitlist)

mod passthrough;
mod tagged;

pub use passthrough::NonTxBuffer;
pub use tagged::TaggedTxBuffer;

use crate::buffer::FileBuffer;
use crate::error::Result;

/// A FileBuffer with begin/commit/rollback crash tagging.
///
/// `begin`/`commit` nest: only the outermost pair changes persistent state.
/// Rollback may be unsupported, which is signalled distinctly
/// ([`PlexError::Unsupported`](crate::PlexError::Unsupported)) from other
/// failures.
pub trait TxFileBuffer: FileBuffer {
    /// Enter (or nest into) a transaction.
    fn begin(&self) -> Result<()>;

    /// Leave one nesting level. Returns true if a transaction had been open.
    fn commit(&self) -> Result<bool>;

    /// Undo the open transaction. Policies without undo fail `Unsupported`.
    fn rollback(&self) -> Result<()>;

    /// Whether `rollback` can ever succeed.
    fn is_rollback_supported(&self) -> bool;

    /// True when no transaction is open and no dirty tag persists.
    fn is_clean(&self) -> Result<bool>;
}
