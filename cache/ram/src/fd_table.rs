//! The open-handle table.
//!
//! Handles are small integers handed to clients in place of pointers; the
//! integer is the wire contract, so the table is an append-with-reuse slot
//! vector rather than a map. Freed slots are reused lowest-first, and the
//! trailing run of free slots is truncated whenever the last slot is
//! freed, keeping the vector no longer than the highest live handle.

use crate::error::{CacheError, CacheResult};
use crate::hash::ObjectId;

/// Hard cap on simultaneously open handles.
pub const DEFAULT_HANDLE_LIMIT: usize = 8192;

/// Slot table mapping open handles to object ids.
pub struct FdTable {
    slots: Vec<Option<ObjectId>>,
    open: usize,
    limit: usize,
}

impl FdTable {
    /// Create a table admitting at most `limit` simultaneously open
    /// handles.
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            open: 0,
            limit,
        }
    }

    /// Allocate a handle for `id`.
    ///
    /// Reuses the lowest free slot, extending the table only when no slot
    /// is free. Fails `TooManyHandles` at the cap.
    pub fn add(&mut self, id: ObjectId) -> CacheResult<usize> {
        if let Some(fd) = self.slots.iter().position(Option::is_none) {
            self.slots[fd] = Some(id);
            self.open += 1;
            return Ok(fd);
        }
        if self.slots.len() >= self.limit {
            return Err(CacheError::TooManyHandles);
        }
        self.slots.push(Some(id));
        self.open += 1;
        Ok(self.slots.len() - 1)
    }

    /// The id behind an open handle, or `None` if the handle is not open.
    pub fn get(&self, fd: usize) -> Option<ObjectId> {
        self.slots.get(fd).copied().flatten()
    }

    /// Free a handle and return the id it named.
    ///
    /// Fails `BadHandle` if the handle is not open. Truncates the
    /// trailing run of free slots afterwards.
    pub fn remove(&mut self, fd: usize) -> CacheResult<ObjectId> {
        let slot = self
            .slots
            .get_mut(fd)
            .ok_or(CacheError::BadHandle)?
            .take()
            .ok_or(CacheError::BadHandle)?;
        self.open -= 1;
        while self.slots.last().is_some_and(Option::is_none) {
            self.slots.pop();
        }
        Ok(slot)
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.open
    }

    /// Current table length, including free interior slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no handle is open.
    pub fn is_empty(&self) -> bool {
        self.open == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::OBJECT_ID_LEN;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; OBJECT_ID_LEN])
    }

    #[test]
    fn test_add_and_get() {
        let mut fds = FdTable::new(16);
        let fd0 = fds.add(id(1)).unwrap();
        let fd1 = fds.add(id(2)).unwrap();
        assert_eq!(fd0, 0);
        assert_eq!(fd1, 1);
        assert_eq!(fds.get(fd0), Some(id(1)));
        assert_eq!(fds.get(fd1), Some(id(2)));
        assert_eq!(fds.get(99), None);
        assert_eq!(fds.open_handles(), 2);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut fds = FdTable::new(16);
        let fd0 = fds.add(id(1)).unwrap();
        let _fd1 = fds.add(id(2)).unwrap();
        assert_eq!(fds.remove(fd0), Ok(id(1)));
        // fd0 freed, fd1 still live: the freed slot comes back first.
        assert_eq!(fds.add(id(3)).unwrap(), fd0);
    }

    #[test]
    fn test_trailing_free_slots_are_truncated() {
        let mut fds = FdTable::new(16);
        let fd0 = fds.add(id(1)).unwrap();
        let fd1 = fds.add(id(2)).unwrap();
        let fd2 = fds.add(id(3)).unwrap();

        fds.remove(fd1).unwrap();
        assert_eq!(fds.len(), 3); // interior hole stays

        fds.remove(fd2).unwrap();
        assert_eq!(fds.len(), 1); // tail and the hole behind it collapse

        fds.remove(fd0).unwrap();
        assert_eq!(fds.len(), 0);
        assert!(fds.is_empty());
    }

    #[test]
    fn test_remove_invalid_handle() {
        let mut fds = FdTable::new(16);
        assert_eq!(fds.remove(0), Err(CacheError::BadHandle));
        let fd = fds.add(id(1)).unwrap();
        fds.remove(fd).unwrap();
        assert_eq!(fds.remove(fd), Err(CacheError::BadHandle));
    }

    #[test]
    fn test_handle_limit() {
        let mut fds = FdTable::new(2);
        fds.add(id(1)).unwrap();
        fds.add(id(2)).unwrap();
        assert_eq!(fds.add(id(3)), Err(CacheError::TooManyHandles));

        fds.remove(0).unwrap();
        assert!(fds.add(id(3)).is_ok());
    }
}
