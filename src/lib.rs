//! # plexfile
//!
//! A storage multiplexer: many independently-growable, independently-
//! truncatable logical files inside one physical backing store, with:
//! - A pluggable random-access byte-store abstraction (file, mmap, memory)
//! - A bit-addressed allocation bitmap
//! - Crash-tagging transaction wrappers (dirty-bit detection, no undo)
//! - A first-fit free-block allocator with per-file indirect-block trees
//! - A repository layer with recyclable integer file ids
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     FileRepository                           │
//! │        (create / delete / enumerate, id recycling)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     MultiplexFile                            │
//! │   (block allocator, file table, indirect-block addressing)   │
//! └───────┬─────────────────────────────────────────┬───────────┘
//!         │                                         │
//!         ▼                                         ▼
//!  ┌─────────────┐                          ┌──────────────┐
//!  │   Bitlist   │                          │ TxFileBuffer │
//!  │ (free bits) │                          │ (dirty tags) │
//!  └──────┬──────┘                          └──────┬───────┘
//!         │                                        │
//!         └──────────────────┬─────────────────────┘
//!                            ▼
//!                    ┌──────────────┐
//!                    │  FileBuffer  │
//!                    │ (disk/mmap/  │
//!                    │    memory)   │
//!                    └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod buffer;
pub mod bitlist;
pub mod tx;
pub mod multiplex;
pub mod repository;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{PlexError, Result};
pub use config::StoreOptions;

pub use bitlist::Bitlist;
pub use buffer::{BufferLock, DiskBuffer, FileBuffer, MappedBuffer, MemBuffer, ReadOnlyBuffer};
pub use multiplex::{MultiplexFile, MuxFile};
pub use repository::FileRepository;
pub use tx::{NonTxBuffer, TaggedTxBuffer, TxFileBuffer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of plexfile
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
