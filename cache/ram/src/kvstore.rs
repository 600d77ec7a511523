//! The partitioned key/value store underlying the cache.
//!
//! A [`MemoryKvStore`] is one partition: a bounded mapping from object id
//! to [`MemoryBuffer`] that keeps entries in least-recently-used order and
//! tracks the exact number of payload bytes it holds. The cache manager
//! composes three of these (pinned, regular, volatile) into one logical
//! cache; the store itself knows nothing about the other partitions.
//!
//! The store is not internally synchronized. The cache manager guards all
//! partitions with a single reader/writer lock, so methods here take
//! `&self` or `&mut self` according to whether they may be called under
//! the shared read lock.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::buffer::MemoryBuffer;
use crate::error::{CacheError, CacheResult};
use crate::hash::ObjectId;
use crate::metrics::{BYTES_EVICTED, OBJECTS_EVICTED};

struct Slot {
    buffer: MemoryBuffer,
    /// Recency stamp; key into the LRU order map.
    stamp: u64,
}

/// One cache partition: an LRU-ordered id → buffer map with byte
/// accounting.
pub struct MemoryKvStore {
    name: &'static str,
    entries: HashMap<ObjectId, Slot, ahash::RandomState>,
    /// Recency stamp → id, ascending stamp = least recently used first.
    order: BTreeMap<u64, ObjectId>,
    next_stamp: u64,
    used_bytes: usize,
    capacity: usize,
}

impl MemoryKvStore {
    /// Create an empty partition holding at most `capacity` payload bytes.
    ///
    /// The name shows up in logs only.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: HashMap::default(),
            order: BTreeMap::new(),
            next_stamp: 0,
            used_bytes: 0,
            capacity,
        }
    }

    /// Whether an entry for `id` is present.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.entries.contains_key(id)
    }

    /// Payload size of the entry at `id`, if present.
    pub fn get_size(&self, id: &ObjectId) -> Option<usize> {
        self.entries.get(id).map(|slot| slot.buffer.size())
    }

    /// Reference count of the entry at `id`, if present.
    pub fn get_refcount(&self, id: &ObjectId) -> Option<u32> {
        self.entries.get(id).map(|slot| slot.buffer.refcount())
    }

    /// Borrow the buffer at `id`, if present. Does not affect LRU order.
    pub fn lookup(&self, id: &ObjectId) -> Option<&MemoryBuffer> {
        self.entries.get(id).map(|slot| &slot.buffer)
    }

    /// Add `delta` to the refcount of the entry at `id` and return the new
    /// count.
    ///
    /// Fails `NoEntry` if the id is absent and `BadCount` if the count
    /// would go negative; the entry is untouched on failure.
    pub fn change_refcount(&mut self, id: &ObjectId, delta: i64) -> CacheResult<u32> {
        let slot = self.entries.get_mut(id).ok_or(CacheError::NoEntry)?;
        let new = i64::from(slot.buffer.refcount()) + delta;
        if new < 0 {
            return Err(CacheError::BadCount);
        }
        slot.buffer.set_refcount(new as u32);
        Ok(new as u32)
    }

    /// Increase the refcount of the entry at `id` by one.
    ///
    /// Returns false if the entry is absent.
    pub fn incref(&mut self, id: &ObjectId) -> bool {
        self.change_refcount(id, 1).is_ok()
    }

    /// Decrease the refcount of the entry at `id` by one.
    ///
    /// Returns false if the entry is absent or already unreferenced.
    pub fn unref(&mut self, id: &ObjectId) -> bool {
        self.change_refcount(id, -1).is_ok()
    }

    /// Copy payload bytes starting at `offset` into `dst`, see pread(2).
    ///
    /// Copies `min(dst.len(), size - offset)` bytes and returns the count.
    /// A read exactly at the end of the payload returns 0 bytes; an offset
    /// past the end is `OutOfBounds`. Does not affect LRU order, so it may
    /// run under the shared read lock; callers that need the access
    /// recorded call [`touch`](Self::touch) first.
    pub fn read(&self, id: &ObjectId, dst: &mut [u8], offset: usize) -> CacheResult<usize> {
        let slot = self.entries.get(id).ok_or(CacheError::NoEntry)?;
        let data = slot.buffer.data();
        if offset > data.len() {
            return Err(CacheError::OutOfBounds);
        }
        let count = dst.len().min(data.len() - offset);
        dst[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    /// Mark the entry at `id` as most recently used.
    ///
    /// Returns false if the entry is absent.
    pub fn touch(&mut self, id: &ObjectId) -> bool {
        let Some(slot) = self.entries.get_mut(id) else {
            return false;
        };
        let removed = self.order.remove(&slot.stamp);
        debug_assert!(removed.is_some());
        slot.stamp = self.next_stamp;
        self.order.insert(slot.stamp, *id);
        self.next_stamp += 1;
        true
    }

    /// Insert a new buffer, taking ownership of its payload.
    ///
    /// The entry starts as most recently used. Returns false without
    /// mutating anything if an entry for `id` already exists; duplicate
    /// policy belongs to the caller.
    pub fn commit(&mut self, id: ObjectId, buffer: MemoryBuffer) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        let size = buffer.size();
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.entries.insert(id, Slot { buffer, stamp });
        self.order.insert(stamp, id);
        self.used_bytes += size;
        debug_assert!(self.used_bytes <= self.capacity);
        true
    }

    /// Delete the entry at `id`, freeing its payload.
    ///
    /// Returns whether the entry existed. Deleting a referenced entry is a
    /// caller policy violation; the store allows it but logs.
    pub fn delete(&mut self, id: &ObjectId) -> bool {
        match self.remove(id) {
            Some(buffer) => {
                if buffer.refcount() > 0 {
                    tracing::warn!(
                        partition = self.name,
                        %id,
                        refcount = buffer.refcount(),
                        "deleted a referenced entry"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Remove the entry at `id` and hand its buffer to the caller without
    /// freeing the payload. Used to move buffers between partitions.
    pub fn pop(&mut self, id: &ObjectId) -> Option<MemoryBuffer> {
        self.remove(id)
    }

    /// Evict least-recently-used unreferenced entries until at most
    /// `target` bytes are used.
    ///
    /// Entries with a nonzero refcount are skipped, not counted as
    /// failures. Returns true iff the target was met.
    pub fn shrink_to(&mut self, target: usize) -> bool {
        if self.used_bytes <= target {
            return true;
        }
        tracing::debug!(
            partition = self.name,
            used = self.used_bytes,
            shrink_to = target,
            "shrinking"
        );
        // Resume the scan after skipped (referenced) entries instead of
        // rescanning them on every iteration.
        let mut cursor = 0u64;
        while self.used_bytes > target {
            let victim = self
                .order
                .range(cursor..)
                .find(|(_, id)| {
                    self.entries
                        .get(*id)
                        .is_some_and(|slot| slot.buffer.refcount() == 0)
                })
                .map(|(&stamp, &id)| (stamp, id));
            let Some((stamp, id)) = victim else {
                return false;
            };
            cursor = stamp + 1;
            let buffer = self
                .remove(&id)
                .unwrap_or_else(|| panic!("{}: victim {} vanished during shrink", self.name, id));
            OBJECTS_EVICTED.increment();
            BYTES_EVICTED.add(buffer.size() as u64);
            tracing::trace!(partition = self.name, %id, size = buffer.size(), "evicted");
        }
        true
    }

    /// Total payload bytes currently held.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Maximum payload bytes this partition may hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the partition holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &MemoryBuffer)> {
        self.entries.iter().map(|(id, slot)| (id, &slot.buffer))
    }

    fn remove(&mut self, id: &ObjectId) -> Option<MemoryBuffer> {
        let slot = self.entries.remove(id)?;
        let removed = self.order.remove(&slot.stamp);
        debug_assert!(removed.is_some());
        self.used_bytes -= slot.buffer.size();
        Some(slot.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{OBJECT_ID_LEN, ObjectType};
    use bytes::Bytes;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; OBJECT_ID_LEN])
    }

    fn buffer(size: usize) -> MemoryBuffer {
        MemoryBuffer::new(
            Bytes::from(vec![0x41u8; size]),
            ObjectType::Regular,
            None,
        )
    }

    fn store() -> MemoryKvStore {
        MemoryKvStore::new("test", 1000)
    }

    #[test]
    fn test_commit_accounts_bytes() {
        let mut kv = store();
        assert!(kv.commit(id(1), buffer(100)));
        assert!(kv.commit(id(2), buffer(200)));
        assert_eq!(kv.used_bytes(), 300);
        assert_eq!(kv.len(), 2);
        assert_eq!(kv.get_size(&id(1)), Some(100));
    }

    #[test]
    fn test_commit_duplicate_is_rejected() {
        let mut kv = store();
        assert!(kv.commit(id(1), buffer(100)));
        assert!(!kv.commit(id(1), buffer(50)));
        assert_eq!(kv.used_bytes(), 100);
        assert_eq!(kv.get_size(&id(1)), Some(100));
    }

    #[test]
    fn test_delete_frees_bytes() {
        let mut kv = store();
        kv.commit(id(1), buffer(100));
        assert!(kv.delete(&id(1)));
        assert!(!kv.delete(&id(1)));
        assert_eq!(kv.used_bytes(), 0);
        assert!(kv.is_empty());
    }

    #[test]
    fn test_pop_transfers_ownership() {
        let mut kv = store();
        kv.commit(id(1), buffer(100));
        let buf = kv.pop(&id(1)).unwrap();
        assert_eq!(buf.size(), 100);
        assert_eq!(kv.used_bytes(), 0);
        assert!(kv.pop(&id(1)).is_none());
    }

    #[test]
    fn test_refcount_discipline() {
        let mut kv = store();
        kv.commit(id(1), buffer(10));
        assert_eq!(kv.get_refcount(&id(1)), Some(0));

        assert!(!kv.unref(&id(1))); // already zero
        assert!(kv.incref(&id(1)));
        assert!(kv.incref(&id(1)));
        assert_eq!(kv.get_refcount(&id(1)), Some(2));
        assert!(kv.unref(&id(1)));
        assert!(kv.unref(&id(1)));
        assert!(!kv.unref(&id(1)));

        assert!(!kv.incref(&id(9))); // absent
        assert_eq!(kv.change_refcount(&id(1), -1), Err(CacheError::BadCount));
    }

    #[test]
    fn test_read_bounds() {
        let mut kv = store();
        kv.commit(id(1), buffer(10));

        let mut dst = [0u8; 100];
        assert_eq!(kv.read(&id(1), &mut dst, 0), Ok(10));
        assert_eq!(&dst[..10], &[0x41u8; 10]);
        assert_eq!(kv.read(&id(1), &mut dst, 4), Ok(6));
        assert_eq!(kv.read(&id(1), &mut dst, 10), Ok(0));
        assert_eq!(kv.read(&id(1), &mut dst, 11), Err(CacheError::OutOfBounds));
        assert_eq!(kv.read(&id(9), &mut dst, 0), Err(CacheError::NoEntry));
    }

    #[test]
    fn test_shrink_evicts_lru_first() {
        let mut kv = store();
        kv.commit(id(1), buffer(300));
        kv.commit(id(2), buffer(300));
        kv.commit(id(3), buffer(300));

        assert!(kv.shrink_to(600));
        assert!(!kv.contains(&id(1)));
        assert!(kv.contains(&id(2)));
        assert!(kv.contains(&id(3)));
        assert_eq!(kv.used_bytes(), 600);
    }

    #[test]
    fn test_touch_promotes() {
        let mut kv = store();
        kv.commit(id(1), buffer(300));
        kv.commit(id(2), buffer(300));
        assert!(kv.touch(&id(1)));

        assert!(kv.shrink_to(300));
        assert!(kv.contains(&id(1)));
        assert!(!kv.contains(&id(2)));
    }

    #[test]
    fn test_shrink_skips_referenced_entries() {
        let mut kv = store();
        kv.commit(id(1), buffer(400));
        kv.commit(id(2), buffer(400));
        kv.incref(&id(1));

        // id(1) is older but referenced; id(2) must go instead.
        assert!(kv.shrink_to(400));
        assert!(kv.contains(&id(1)));
        assert!(!kv.contains(&id(2)));

        // Nothing evictable left: target unreachable.
        assert!(!kv.shrink_to(100));
        assert_eq!(kv.used_bytes(), 400);
    }

    #[test]
    fn test_shrink_to_zero_empties_unreferenced_store() {
        let mut kv = store();
        kv.commit(id(1), buffer(100));
        kv.commit(id(2), buffer(100));
        assert!(kv.shrink_to(0));
        assert!(kv.is_empty());
        assert_eq!(kv.used_bytes(), 0);
    }
}
