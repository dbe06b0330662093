//! Bi-map between opaque remote-source handles and their 16-byte CIDs.
//!
//! Grounded on `source_loss.rs`'s use of a single process-wide index: the
//! registry here plays the same role as the reference implementation's
//! `get_remote_source_cid`/`get_remote_source_handle` rbtrees in
//! `src/sacn/common.c`, refcounted so a handle survives as long as any
//! receiver, merge receiver, or source detector still references it.

use std::collections::BTreeMap;

use crate::cid::Cid;
use crate::error::Error;

/// An opaque, process-wide handle standing in for a remote source's CID.
///
/// `0xFFFF` is reserved as the invalid handle and is never allocated.
pub type RemoteSourceHandle = u16;

/// The reserved invalid handle value.
pub const INVALID_HANDLE: RemoteSourceHandle = 0xFFFF;

struct Entry {
    cid: Cid,
    refcount: u32,
}

/// The process-wide remote-source registry.
///
/// `add`/`release` are O(log N); handle allocation wraps through the 16-bit
/// space, skipping values currently in use and the reserved invalid value.
#[derive(Default)]
pub struct RemoteSourceRegistry {
    by_handle: BTreeMap<RemoteSourceHandle, Entry>,
    by_cid: BTreeMap<Cid, RemoteSourceHandle>,
    next_handle: RemoteSourceHandle,
}

impl RemoteSourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { by_handle: BTreeMap::new(), by_cid: BTreeMap::new(), next_handle: 0 }
    }

    /// Returns the handle for `cid`, allocating and inserting a new one if
    /// this is the first reference, or incrementing the refcount of an
    /// existing one.
    ///
    /// Returns [Error::NoMemory] if the 16-bit handle space is exhausted
    /// (65 535 concurrently-referenced remote sources).
    pub fn add(&mut self, cid: Cid) -> Result<RemoteSourceHandle, Error> {
        if let Some(&handle) = self.by_cid.get(&cid) {
            self.by_handle.get_mut(&handle).expect("by_cid/by_handle desync").refcount += 1;
            return Ok(handle);
        }

        let handle = self.allocate_handle()?;
        self.by_handle.insert(handle, Entry { cid, refcount: 1 });
        self.by_cid.insert(cid, handle);
        Ok(handle)
    }

    /// Decrements the refcount for `handle`; at zero, removes both
    /// directions of the mapping so the handle may be reused.
    pub fn release(&mut self, handle: RemoteSourceHandle) {
        let Some(entry) = self.by_handle.get_mut(&handle) else { return };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let cid = entry.cid;
            self.by_handle.remove(&handle);
            self.by_cid.remove(&cid);
        }
    }

    /// Looks up the CID for a live handle.
    pub fn cid_for_handle(&self, handle: RemoteSourceHandle) -> Option<Cid> {
        self.by_handle.get(&handle).map(|e| e.cid)
    }

    /// Looks up the handle for a known CID, without affecting its refcount.
    pub fn handle_for_cid(&self, cid: &Cid) -> Option<RemoteSourceHandle> {
        self.by_cid.get(cid).copied()
    }

    /// Returns the current refcount for `handle`, or 0 if unknown.
    pub fn refcount(&self, handle: RemoteSourceHandle) -> u32 {
        self.by_handle.get(&handle).map(|e| e.refcount).unwrap_or(0)
    }

    /// The number of distinct remote sources currently tracked.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether the registry holds no live sources.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    fn allocate_handle(&mut self) -> Result<RemoteSourceHandle, Error> {
        if self.by_handle.len() >= (u16::MAX as usize) {
            // Every non-reserved value is in use.
            return Err(Error::NoMemory);
        }

        loop {
            let candidate = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1);
            if candidate == INVALID_HANDLE {
                continue;
            }
            if !self.by_handle.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u8) -> Cid {
        Cid::from_bytes([n; 16])
    }

    #[test]
    fn add_is_idempotent_and_refcounted() {
        let mut reg = RemoteSourceRegistry::new();
        let h1 = reg.add(cid(1)).unwrap();
        let h2 = reg.add(cid(1)).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(reg.refcount(h1), 2);

        reg.release(h1);
        assert_eq!(reg.refcount(h1), 1);
        assert_eq!(reg.cid_for_handle(h1), Some(cid(1)));

        reg.release(h1);
        assert_eq!(reg.refcount(h1), 0);
        assert!(reg.cid_for_handle(h1).is_none());
        assert!(reg.handle_for_cid(&cid(1)).is_none());
    }

    #[test]
    fn distinct_cids_get_distinct_handles() {
        let mut reg = RemoteSourceRegistry::new();
        let h1 = reg.add(cid(1)).unwrap();
        let h2 = reg.add(cid(2)).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn never_allocates_the_invalid_handle() {
        let mut reg = RemoteSourceRegistry::new();
        reg.next_handle = INVALID_HANDLE;
        let h = reg.add(cid(9)).unwrap();
        assert_ne!(h, INVALID_HANDLE);
    }

    #[test]
    fn reuses_released_handles() {
        let mut reg = RemoteSourceRegistry::new();
        reg.next_handle = 5;
        let h1 = reg.add(cid(1)).unwrap();
        reg.release(h1);
        // next_handle wrapped forward; force it back around to prove reuse
        // happens rather than growing unbounded.
        reg.next_handle = h1;
        let h2 = reg.add(cid(2)).unwrap();
        assert_eq!(h1, h2);
    }
}
