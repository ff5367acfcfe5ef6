//! Serialized access to a volume
//!
//! The engine keeps its FAT cache, free-space counters and stream state in
//! the [`Volume`] without any internal locking. Hosts that can reach the
//! volume from more than one context (interrupt handlers, a second core,
//! host threads) share it through [`SharedVolume`], which runs every
//! operation under one spin lock.

use crate::error::FatResult;
use crate::fs::{MountOptions, Volume};
use crate::storage::SectorStore;
use spin::{Mutex, MutexGuard};

/// A volume behind a single mutual-exclusion boundary
pub struct SharedVolume<D: SectorStore> {
    inner: Mutex<Volume<D>>,
}

impl<D: SectorStore> SharedVolume<D> {
    pub fn new(volume: Volume<D>) -> Self {
        Self {
            inner: Mutex::new(volume),
        }
    }

    /// Mount `store` and wrap the resulting volume
    pub fn mount(store: D, options: MountOptions) -> FatResult<Self> {
        Volume::mount(store, options).map(Self::new)
    }

    /// Exclusive access for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, Volume<D>> {
        self.inner.lock()
    }

    /// Run one operation under the lock
    pub fn with<R>(&self, f: impl FnOnce(&mut Volume<D>) -> R) -> R {
        let mut volume = self.inner.lock();
        f(&mut volume)
    }

    /// Unwrap, flush and return the store
    pub fn unmount(self) -> FatResult<D> {
        self.inner.into_inner().unmount()
    }
}
