//! Handle table implementation
//!
//! Each namespace (buffers, models) owns one `HandleTable`. Allocation
//! picks the smallest unused id starting at 1; id 0 is never issued so it
//! can stand for "no handle" at the boundary. Records are stored behind
//! `Arc` so a lookup taken by an in-flight transfer keeps the record
//! alive after release: the handle dies immediately, the storage is
//! reclaimed when the last borrower drops.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{AccelError, AccelResult};

/// Opaque identifier naming a live resource within one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Construct from a raw id, e.g. one received over the boundary
    pub fn from_raw(id: u32) -> Self {
        Handle(id)
    }

    /// The raw integer value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Table mapping handles to resource records for one namespace
#[derive(Debug)]
pub struct HandleTable<T> {
    /// Namespace label for logs
    name: &'static str,
    /// Maximum number of simultaneously live entries
    capacity: usize,
    entries: Mutex<BTreeMap<u32, Arc<T>>>,
}

impl<T> HandleTable<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        HandleTable {
            name,
            capacity,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a resource and return its newly assigned handle.
    ///
    /// The smallest unused id >= 1 is chosen, so ids are only reused
    /// after an explicit release.
    pub fn allocate(&self, resource: T) -> AccelResult<Handle> {
        let mut entries = self.entries.lock()?;
        if entries.len() >= self.capacity {
            return Err(AccelError::OutOfHandles);
        }

        // BTreeMap keys iterate sorted; the first gap is the smallest
        // unused id.
        let mut id = 1u32;
        for &used in entries.keys() {
            if used == id {
                id += 1;
            } else if used > id {
                break;
            }
        }

        entries.insert(id, Arc::new(resource));
        tracing::trace!(namespace = self.name, handle = id, "allocated handle");
        Ok(Handle(id))
    }

    /// Look up a live resource, returning a borrowed reference.
    pub fn lookup(&self, handle: Handle) -> AccelResult<Arc<T>> {
        self.entries
            .lock()?
            .get(&handle.0)
            .cloned()
            .ok_or(AccelError::HandleNotFound(handle.0))
    }

    /// Remove a handle, returning the record for deferred destruction.
    ///
    /// Subsequent lookups fail with NotFound immediately; the record
    /// itself lives until every outstanding `Arc` from `lookup` drops.
    pub fn release(&self, handle: Handle) -> AccelResult<Arc<T>> {
        let record = self
            .entries
            .lock()?
            .remove(&handle.0)
            .ok_or(AccelError::HandleNotFound(handle.0))?;
        tracing::trace!(namespace = self.name, handle = handle.0, "released handle");
        Ok(record)
    }

    /// Check whether a handle currently names a live resource
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(&handle.0))
            .unwrap_or(false)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning the records (device teardown)
    pub fn drain(&self) -> Vec<Arc<T>> {
        match self.entries.lock() {
            Ok(mut entries) => {
                let drained: Vec<_> = std::mem::take(&mut *entries).into_values().collect();
                if !drained.is_empty() {
                    tracing::debug!(
                        namespace = self.name,
                        count = drained.len(),
                        "drained handle table"
                    );
                }
                drained
            }
            Err(_) => Vec::new(),
        }
    }
}
