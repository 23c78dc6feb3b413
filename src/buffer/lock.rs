//! Buffer Lock
//!
//! Advisory read/write/upgradable lock attached to every FileBuffer.

use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

/// Shared (read) guard on a buffer lock.
pub type ReadGuard<'a> = RwLockReadGuard<'a, ()>;
/// Exclusive (write) guard on a buffer lock.
pub type WriteGuard<'a> = RwLockWriteGuard<'a, ()>;
/// Upgradable read guard: shared with readers, promotable to a write guard
/// without releasing in between.
pub type UpgradableGuard<'a> = RwLockUpgradableReadGuard<'a, ()>;

/// Advisory lock for coordinating compound buffer operations.
///
/// The upgradable form is the important one: a reader that may need to write
/// (bit toggling, header read-modify-write) acquires it, inspects state under
/// shared access, then promotes in place — no release/re-acquire window for a
/// second writer to slip through.
#[derive(Debug, Default)]
pub struct BufferLock {
    inner: RwLock<()>,
}

impl BufferLock {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(()),
        }
    }

    /// Acquire shared access, blocking.
    pub fn read(&self) -> ReadGuard<'_> {
        self.inner.read()
    }

    /// Acquire exclusive access, blocking.
    pub fn write(&self) -> WriteGuard<'_> {
        self.inner.write()
    }

    /// Acquire upgradable shared access, blocking.
    pub fn upgradable_read(&self) -> UpgradableGuard<'_> {
        self.inner.upgradable_read()
    }

    /// Timeout-bounded shared acquisition. `None` means the operation was
    /// abandoned with no partial effect.
    pub fn try_read_for(&self, timeout: Duration) -> Option<ReadGuard<'_>> {
        self.inner.try_read_for(timeout)
    }

    /// Timeout-bounded exclusive acquisition.
    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        self.inner.try_write_for(timeout)
    }

    /// Timeout-bounded upgradable acquisition.
    pub fn try_upgradable_read_for(&self, timeout: Duration) -> Option<UpgradableGuard<'_>> {
        self.inner.try_upgradable_read_for(timeout)
    }

    /// Promote an upgradable guard to exclusive without releasing it.
    pub fn upgrade(guard: UpgradableGuard<'_>) -> WriteGuard<'_> {
        RwLockUpgradableReadGuard::upgrade(guard)
    }
}
