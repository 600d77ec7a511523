//! The cache manager: three partitions composed into one logical cache.
//!
//! The manager owns the pinned, regular, and volatile partitions, the
//! open-handle table, and the global size cap. Objects move between
//! partitions without copying: opening a cold object promotes its buffer
//! into the pinned partition, closing the last handle demotes it back to
//! the partition matching its type. Pinned and catalog objects stay in
//! the pinned partition for their whole lifetime.
//!
//! ```text
//!            open (promote)                 commit_txn
//!   +----------+ <------- +----------+ <-------------- clients
//!   |  pinned  |          | regular  |
//!   | (refcnt) | -------> | volatile | ----> evicted (LRU, volatile first)
//!   +----------+  close   +----------+
//!               (demote)
//! ```
//!
//! A single reader/writer lock serializes mutations; reads through open
//! handles share the read lock. Transactions are staged outside the lock
//! and only touch shared state at commit.

use parking_lot::RwLock;

use crate::buffer::{MemoryBuffer, ObjectInfo};
use crate::error::{CacheError, CacheResult};
use crate::fd_table::{DEFAULT_HANDLE_LIMIT, FdTable};
use crate::hash::{ObjectId, ObjectType};
use crate::kvstore::MemoryKvStore;
use crate::metrics::{
    BYTES_COMMITTED, OBJECTS_COMMITTED, OPEN_HANDLES, OPEN_HITS, OPEN_MISSES, USED_BYTES,
};
use crate::transaction::Transaction;

/// Default global size cap: 1 GB.
const DEFAULT_MAX_SIZE: usize = 1024 * 1024 * 1024;

/// Builder for [`RamCacheManager`].
pub struct RamCacheManagerBuilder {
    max_size: usize,
    handle_limit: usize,
}

impl RamCacheManagerBuilder {
    /// Create a builder with the default size cap and handle limit.
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            handle_limit: DEFAULT_HANDLE_LIMIT,
        }
    }

    /// Total payload bytes the cache may hold across all partitions.
    ///
    /// `usize::MAX` means uncapped.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Maximum number of simultaneously open handles.
    pub fn handle_limit(mut self, handle_limit: usize) -> Self {
        self.handle_limit = handle_limit;
        self
    }

    /// Build the cache manager.
    pub fn build(self) -> RamCacheManager {
        RamCacheManager {
            max_size: self.max_size,
            state: RwLock::new(CacheState {
                pinned: MemoryKvStore::new("pinned", self.max_size),
                regular: MemoryKvStore::new("regular", self.max_size),
                volatile: MemoryKvStore::new("volatile", self.max_size),
                fds: FdTable::new(self.handle_limit),
            }),
        }
    }
}

impl Default for RamCacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheState {
    pinned: MemoryKvStore,
    regular: MemoryKvStore,
    volatile: MemoryKvStore,
    fds: FdTable,
}

impl CacheState {
    fn total_bytes(&self) -> usize {
        self.pinned
            .used_bytes()
            .saturating_add(self.regular.used_bytes())
            .saturating_add(self.volatile.used_bytes())
    }

    fn sync_gauges(&self) {
        USED_BYTES.set(self.total_bytes() as i64);
        OPEN_HANDLES.set(self.fds.open_handles() as i64);
    }
}

/// Byte usage per partition, mainly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUsage {
    /// Bytes in the pinned partition.
    pub pinned: usize,
    /// Bytes in the regular partition.
    pub regular: usize,
    /// Bytes in the volatile partition.
    pub volatile: usize,
}

impl CacheUsage {
    /// Bytes across all partitions.
    pub fn total(&self) -> usize {
        self.pinned + self.regular + self.volatile
    }
}

/// Aggregate cache state, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    /// The global size cap; `usize::MAX` means uncapped.
    pub max_size: usize,
    /// Total payload bytes currently held.
    pub used_bytes: usize,
    /// Payload bytes held by objects with at least one reference.
    pub pinned_bytes: usize,
    /// Currently open handles.
    pub open_handles: usize,
}

/// One element of a listing snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// The object's id.
    pub id: ObjectId,
    /// The object's metadata at snapshot time.
    pub info: ObjectInfo,
}

/// The in-memory content-addressed cache.
///
/// All operations are safe to call from multiple threads; see the module
/// documentation for the locking discipline.
pub struct RamCacheManager {
    max_size: usize,
    state: RwLock<CacheState>,
}

impl RamCacheManager {
    /// Create a builder.
    pub fn builder() -> RamCacheManagerBuilder {
        RamCacheManagerBuilder::new()
    }

    /// The global size cap.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Open the object at `id` for reading and pin it.
    ///
    /// A cold object is promoted into the pinned partition; its buffer
    /// moves, it is not copied. Fails `NoEntry` if the id is not cached
    /// and `TooManyHandles` if the handle table is full.
    pub fn open(&self, id: ObjectId) -> CacheResult<usize> {
        let mut st = self.state.write();
        let fd = st.fds.add(id)?;
        match Self::pin(&mut st, &id) {
            Ok(()) => {
                OPEN_HITS.increment();
                st.sync_gauges();
                tracing::trace!(%id, fd, "open");
                Ok(fd)
            }
            Err(err) => {
                // Keep the slot table compact: the slot allocated above
                // must not leak.
                st.fds
                    .remove(fd)
                    .unwrap_or_else(|_| panic!("handle {fd} vanished while locked"));
                OPEN_MISSES.increment();
                Err(err)
            }
        }
    }

    /// Close an open handle.
    ///
    /// Dropping the last reference demotes a regular or volatile object
    /// back to its cold partition; pinned and catalog objects stay.
    pub fn close(&self, fd: usize) -> CacheResult<()> {
        let mut st = self.state.write();
        let id = st.fds.remove(fd)?;
        if !st.pinned.unref(&id) {
            panic!("open handle {fd} refers to {id} which is not pinned");
        }
        if st.pinned.get_refcount(&id) == Some(0) {
            Self::demote(&mut st, &id);
        }
        st.sync_gauges();
        tracing::trace!(%id, fd, "close");
        Ok(())
    }

    /// Duplicate an open handle; the object gains one reference.
    pub fn dup(&self, fd: usize) -> CacheResult<usize> {
        let mut st = self.state.write();
        let id = st.fds.get(fd).ok_or(CacheError::BadHandle)?;
        let dup_fd = st.fds.add(id)?;
        if !st.pinned.incref(&id) {
            panic!("open handle {fd} refers to {id} which is not pinned");
        }
        st.sync_gauges();
        Ok(dup_fd)
    }

    /// Size of the object behind an open handle.
    pub fn get_size(&self, fd: usize) -> CacheResult<usize> {
        let st = self.state.read();
        let id = st.fds.get(fd).ok_or(CacheError::BadHandle)?;
        match st.pinned.get_size(&id) {
            Some(size) => Ok(size),
            None => panic!("open handle {fd} refers to {id} which is not pinned"),
        }
    }

    /// Read from an open handle at `offset` into `dst`, see pread(2).
    ///
    /// Returns the number of bytes copied; a read exactly at the end of
    /// the object returns 0.
    pub fn pread(&self, fd: usize, dst: &mut [u8], offset: usize) -> CacheResult<usize> {
        let st = self.state.read();
        let id = st.fds.get(fd).ok_or(CacheError::BadHandle)?;
        match st.pinned.read(&id, dst, offset) {
            Err(CacheError::NoEntry) => {
                panic!("open handle {fd} refers to {id} which is not pinned")
            }
            result => result,
        }
    }

    /// Validate a handle; prefetching is meaningless for a RAM cache.
    pub fn readahead(&self, fd: usize) -> CacheResult<()> {
        let st = self.state.read();
        st.fds.get(fd).map(|_| ()).ok_or(CacheError::BadHandle)
    }

    /// Start staging an object. The transaction is owned by the caller
    /// and takes no cache lock until commit.
    pub fn start_txn(&self, id: ObjectId, expected_size: Option<usize>) -> Transaction {
        Transaction::new(id, expected_size)
    }

    /// Move a finished transaction into the cache.
    ///
    /// Fails `AlreadyExists` if the id is cached in any partition and
    /// `NoSpace` if eviction cannot make room; neither failure mutates
    /// partition state.
    pub fn commit_txn(&self, txn: Transaction) -> CacheResult<()> {
        let mut st = self.state.write();
        self.commit_to_store(&mut st, txn)
    }

    /// Commit a finished transaction and immediately open it.
    pub fn open_from_txn(&self, txn: Transaction) -> CacheResult<usize> {
        let mut st = self.state.write();
        let id = txn.id();
        self.commit_to_store(&mut st, txn)?;
        let fd = st.fds.add(id)?;
        Self::pin(&mut st, &id)
            .unwrap_or_else(|_| panic!("{id} missing right after commit"));
        st.sync_gauges();
        Ok(fd)
    }

    /// Add `delta` to the reference count of the object at `id`.
    ///
    /// A positive delta on a cold object promotes it into the pinned
    /// partition; a count dropping to zero demotes by type, exactly as
    /// open and close do. Fails `NoEntry` if the id is absent and
    /// `BadCount` if the count would go negative, leaving state unchanged.
    pub fn change_refcount(&self, id: ObjectId, delta: i64) -> CacheResult<()> {
        let mut st = self.state.write();
        match st.pinned.change_refcount(&id, delta) {
            Ok(0) => {
                Self::demote(&mut st, &id);
            }
            Ok(_) => {}
            Err(CacheError::NoEntry) => {
                // Cold entries have refcount 0 by definition.
                let cold = st.regular.contains(&id) || st.volatile.contains(&id);
                if !cold {
                    return Err(CacheError::NoEntry);
                }
                if delta < 0 {
                    return Err(CacheError::BadCount);
                }
                if delta > 0 {
                    Self::pin(&mut st, &id)
                        .unwrap_or_else(|_| panic!("{id} vanished while locked"));
                    st.pinned
                        .change_refcount(&id, delta - 1)
                        .unwrap_or_else(|_| panic!("{id} vanished while locked"));
                }
            }
            Err(err) => return Err(err),
        }
        st.sync_gauges();
        Ok(())
    }

    /// Metadata of the object at `id`, wherever it lives.
    pub fn object_info(&self, id: ObjectId) -> CacheResult<ObjectInfo> {
        let st = self.state.read();
        [&st.pinned, &st.regular, &st.volatile]
            .into_iter()
            .find_map(|partition| partition.lookup(&id))
            .map(MemoryBuffer::info)
            .ok_or(CacheError::NoEntry)
    }

    /// Read from the object at `id` without opening a handle.
    ///
    /// Used by out-of-process clients that address objects directly. The
    /// access refreshes the object's LRU position.
    pub fn read_object(&self, id: ObjectId, dst: &mut [u8], offset: usize) -> CacheResult<usize> {
        let mut st = self.state.write();
        let st = &mut *st;
        for partition in [&mut st.pinned, &mut st.regular, &mut st.volatile] {
            if partition.touch(&id) {
                return partition.read(&id, dst, offset);
            }
        }
        Err(CacheError::NoEntry)
    }

    /// Drop the unreferenced object at `id` from the cache.
    ///
    /// Fails `NoEntry` if the id is absent and `BadCount` if the object
    /// is currently referenced.
    pub fn delete_object(&self, id: ObjectId) -> CacheResult<()> {
        let mut st = self.state.write();
        if st.pinned.contains(&id) {
            if st.pinned.get_refcount(&id) != Some(0) {
                return Err(CacheError::BadCount);
            }
            st.pinned.delete(&id);
        } else if !st.regular.delete(&id) && !st.volatile.delete(&id) {
            return Err(CacheError::NoEntry);
        }
        st.sync_gauges();
        Ok(())
    }

    /// Evict cold objects until at most `target` bytes are used: volatile
    /// entries first, then regular, never pinned.
    ///
    /// Returns the used bytes afterwards. Fails `Partial` when pinned
    /// bytes keep the cache above the target; the eviction still
    /// happened, so the cache is as small as it can get.
    pub fn shrink(&self, target: usize) -> CacheResult<usize> {
        let mut st = self.state.write();
        let sticky = st.pinned.used_bytes().saturating_add(st.regular.used_bytes());
        st.volatile.shrink_to(target.saturating_sub(sticky));
        if st.total_bytes() > target {
            let floor = st.pinned.used_bytes().saturating_add(st.volatile.used_bytes());
            st.regular.shrink_to(target.saturating_sub(floor));
        }
        let used = st.total_bytes();
        st.sync_gauges();
        tracing::debug!(shrink_to = target, used, "shrink");
        if used <= target {
            Ok(used)
        } else {
            Err(CacheError::Partial)
        }
    }

    /// Aggregate cache state.
    pub fn info(&self) -> CacheInfo {
        let st = self.state.read();
        let pinned_bytes = st
            .pinned
            .iter()
            .filter(|(_, buffer)| buffer.refcount() > 0)
            .map(|(_, buffer)| buffer.size())
            .sum();
        CacheInfo {
            max_size: self.max_size,
            used_bytes: st.total_bytes(),
            pinned_bytes,
            open_handles: st.fds.open_handles(),
        }
    }

    /// Per-partition byte usage.
    pub fn usage(&self) -> CacheUsage {
        let st = self.state.read();
        CacheUsage {
            pinned: st.pinned.used_bytes(),
            regular: st.regular.used_bytes(),
            volatile: st.volatile.used_bytes(),
        }
    }

    /// Snapshot the whole cache for a listing.
    ///
    /// The snapshot is independent of later mutations.
    pub fn snapshot(&self) -> Vec<ListingEntry> {
        let st = self.state.read();
        [&st.pinned, &st.regular, &st.volatile]
            .into_iter()
            .flat_map(|partition| partition.iter())
            .map(|(id, buffer)| ListingEntry {
                id: *id,
                info: buffer.info(),
            })
            .collect()
    }

    /// Pin the object at `id`: incref it in the pinned partition,
    /// promoting it out of a cold partition first if necessary.
    fn pin(st: &mut CacheState, id: &ObjectId) -> CacheResult<()> {
        if st.pinned.incref(id) {
            return Ok(());
        }
        let buffer = st
            .regular
            .pop(id)
            .or_else(|| st.volatile.pop(id))
            .ok_or(CacheError::NoEntry)?;
        tracing::trace!(%id, size = buffer.size(), "promoted to pinned");
        if !st.pinned.commit(*id, buffer) {
            panic!("{id} in two partitions at once");
        }
        if !st.pinned.incref(id) {
            panic!("{id} vanished right after promotion");
        }
        Ok(())
    }

    /// Move a now-unreferenced object from the pinned partition back to
    /// the cold partition matching its type. Pinned and catalog objects
    /// stay where they are.
    fn demote(st: &mut CacheState, id: &ObjectId) {
        let object_type = match st.pinned.lookup(id) {
            Some(buffer) => buffer.object_type(),
            None => panic!("{id} disappeared from the pinned partition"),
        };
        if !object_type.is_evictable() {
            return;
        }
        let buffer = st
            .pinned
            .pop(id)
            .unwrap_or_else(|| panic!("{id} disappeared from the pinned partition"));
        tracing::trace!(%id, %object_type, "demoted");
        let cold = match object_type {
            ObjectType::Regular => &mut st.regular,
            _ => &mut st.volatile,
        };
        if !cold.commit(*id, buffer) {
            panic!("{id} in two partitions at once");
        }
    }

    /// Insert a finished transaction, evicting cold objects to make room.
    ///
    /// Volatile entries are dropped before regular entries; pinned bytes
    /// are never touched. The duplicate check runs before any eviction so
    /// a failed commit leaves the cache exactly as it was.
    fn commit_to_store(&self, st: &mut CacheState, txn: Transaction) -> CacheResult<()> {
        let id = txn.id();
        if st.pinned.contains(&id) || st.regular.contains(&id) || st.volatile.contains(&id) {
            return Err(CacheError::AlreadyExists);
        }

        let buffer = txn.into_buffer();
        let size = buffer.size();
        let pinned = st.pinned.used_bytes();
        let regular = st.regular.used_bytes();
        let volatile = st.volatile.used_bytes();
        let total = st.total_bytes().saturating_add(size);

        if total > self.max_size {
            let overflow = total - self.max_size;
            if pinned + regular + size <= self.max_size {
                // Dropping volatile bytes alone is enough.
                if !st.volatile.shrink_to(volatile - overflow) {
                    panic!("volatile partition holds referenced entries");
                }
            } else if pinned + size <= self.max_size {
                if !st.volatile.shrink_to(0) {
                    panic!("volatile partition holds referenced entries");
                }
                if !st.regular.shrink_to(regular + volatile - overflow) {
                    panic!("regular partition holds referenced entries");
                }
            } else {
                // Even an empty set of cold objects would not fit this
                // commit next to the pinned bytes.
                tracing::debug!(%id, size, pinned, "commit rejected, cache full of pinned bytes");
                return Err(CacheError::NoSpace);
            }
        }

        let partition = match buffer.object_type() {
            ObjectType::Regular => &mut st.regular,
            ObjectType::Volatile => &mut st.volatile,
            ObjectType::Pinned | ObjectType::Catalog => &mut st.pinned,
        };
        if !partition.commit(id, buffer) {
            panic!("{id} appeared during commit while locked");
        }
        OBJECTS_COMMITTED.increment();
        BYTES_COMMITTED.add(size as u64);
        st.sync_gauges();
        tracing::trace!(%id, size, "committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::OBJECT_ID_LEN;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; OBJECT_ID_LEN])
    }

    fn cache(max_size: usize) -> RamCacheManager {
        RamCacheManager::builder().max_size(max_size).build()
    }

    fn commit(
        cache: &RamCacheManager,
        object: ObjectId,
        size: usize,
        object_type: ObjectType,
    ) -> CacheResult<()> {
        let mut txn = cache.start_txn(object, Some(size));
        txn.set_control(None, object_type);
        txn.write(&vec![0x41u8; size]).unwrap();
        cache.commit_txn(txn)
    }

    #[test]
    fn test_open_missing_object() {
        let cache = cache(1000);
        assert_eq!(cache.open(id(1)), Err(CacheError::NoEntry));
        // The failed open must not leak its handle slot.
        assert_eq!(cache.info().open_handles, 0);
    }

    #[test]
    fn test_commit_duplicate_id() {
        let cache = cache(1000);
        commit(&cache, id(1), 100, ObjectType::Regular).unwrap();
        assert_eq!(
            commit(&cache, id(1), 100, ObjectType::Regular),
            Err(CacheError::AlreadyExists)
        );
        // Same id under a different type is still a duplicate.
        assert_eq!(
            commit(&cache, id(1), 100, ObjectType::Volatile),
            Err(CacheError::AlreadyExists)
        );
    }

    #[test]
    fn test_close_invalid_handle() {
        let cache = cache(1000);
        assert_eq!(cache.close(42), Err(CacheError::BadHandle));
    }

    #[test]
    fn test_dup_shares_the_object() {
        let cache = cache(1000);
        commit(&cache, id(1), 10, ObjectType::Regular).unwrap();
        let fd = cache.open(id(1)).unwrap();
        let dup_fd = cache.dup(fd).unwrap();
        assert_ne!(fd, dup_fd);

        // Closing one handle keeps the object pinned.
        cache.close(fd).unwrap();
        assert_eq!(cache.usage().pinned, 10);
        cache.close(dup_fd).unwrap();
        assert_eq!(cache.usage().regular, 10);
    }

    #[test]
    fn test_readahead_validates_handle() {
        let cache = cache(1000);
        commit(&cache, id(1), 10, ObjectType::Regular).unwrap();
        let fd = cache.open(id(1)).unwrap();
        assert_eq!(cache.readahead(fd), Ok(()));
        assert_eq!(cache.readahead(fd + 1), Err(CacheError::BadHandle));
        cache.close(fd).unwrap();
    }

    #[test]
    fn test_open_from_txn() {
        let cache = cache(1000);
        let mut txn = cache.start_txn(id(1), None);
        txn.write(b"hello").unwrap();
        let fd = cache.open_from_txn(txn).unwrap();

        let mut dst = [0u8; 16];
        assert_eq!(cache.pread(fd, &mut dst, 0), Ok(5));
        assert_eq!(&dst[..5], b"hello");
        assert_eq!(cache.get_size(fd), Ok(5));
        assert_eq!(cache.usage().pinned, 5);
        cache.close(fd).unwrap();
    }

    #[test]
    fn test_catalog_stays_pinned_after_close() {
        let cache = cache(1000);
        commit(&cache, id(1), 10, ObjectType::Catalog).unwrap();
        assert_eq!(cache.usage().pinned, 10);

        let fd = cache.open(id(1)).unwrap();
        cache.close(fd).unwrap();
        assert_eq!(cache.usage().pinned, 10);
        assert_eq!(cache.usage().regular, 0);
    }

    #[test]
    fn test_change_refcount_promotes_and_demotes() {
        let cache = cache(1000);
        commit(&cache, id(1), 10, ObjectType::Volatile).unwrap();
        assert_eq!(cache.usage().volatile, 10);

        cache.change_refcount(id(1), 2).unwrap();
        assert_eq!(cache.usage().pinned, 10);
        assert!(cache.object_info(id(1)).unwrap().pinned);

        cache.change_refcount(id(1), -1).unwrap();
        assert_eq!(cache.usage().pinned, 10);

        cache.change_refcount(id(1), -1).unwrap();
        assert_eq!(cache.usage().volatile, 10);
        assert!(!cache.object_info(id(1)).unwrap().pinned);
    }

    #[test]
    fn test_change_refcount_errors() {
        let cache = cache(1000);
        assert_eq!(cache.change_refcount(id(9), 1), Err(CacheError::NoEntry));

        commit(&cache, id(1), 10, ObjectType::Regular).unwrap();
        assert_eq!(cache.change_refcount(id(1), -1), Err(CacheError::BadCount));
        assert_eq!(cache.usage().regular, 10);

        let fd = cache.open(id(1)).unwrap();
        assert_eq!(cache.change_refcount(id(1), -2), Err(CacheError::BadCount));
        assert!(cache.object_info(id(1)).unwrap().pinned);
        cache.close(fd).unwrap();
    }

    #[test]
    fn test_delete_object() {
        let cache = cache(1000);
        commit(&cache, id(1), 10, ObjectType::Regular).unwrap();
        commit(&cache, id(2), 10, ObjectType::Pinned).unwrap();

        cache.delete_object(id(1)).unwrap();
        assert_eq!(cache.object_info(id(1)), Err(CacheError::NoEntry));
        assert_eq!(cache.delete_object(id(1)), Err(CacheError::NoEntry));

        // Unreferenced pinned-type objects may be deleted; referenced
        // objects may not.
        commit(&cache, id(3), 10, ObjectType::Regular).unwrap();
        let fd = cache.open(id(3)).unwrap();
        assert_eq!(cache.delete_object(id(3)), Err(CacheError::BadCount));
        cache.close(fd).unwrap();
        cache.delete_object(id(2)).unwrap();
    }

    #[test]
    fn test_info_counts_pinned_bytes() {
        let cache = cache(100_000);
        commit(&cache, id(1), 100, ObjectType::Regular).unwrap();
        commit(&cache, id(2), 200, ObjectType::Regular).unwrap();
        commit(&cache, id(3), 50, ObjectType::Catalog).unwrap();

        let fd = cache.open(id(1)).unwrap();
        let info = cache.info();
        assert_eq!(info.used_bytes, 350);
        // The unreferenced catalog sits in the pinned partition but is
        // not pinned by a handle.
        assert_eq!(info.pinned_bytes, 100);
        assert_eq!(info.open_handles, 1);
        cache.close(fd).unwrap();
    }

    #[test]
    fn test_too_many_handles() {
        let cache = RamCacheManager::builder()
            .max_size(1000)
            .handle_limit(2)
            .build();
        commit(&cache, id(1), 10, ObjectType::Regular).unwrap();

        let fd0 = cache.open(id(1)).unwrap();
        let fd1 = cache.open(id(1)).unwrap();
        assert_eq!(cache.open(id(1)), Err(CacheError::TooManyHandles));
        cache.close(fd0).unwrap();
        cache.close(fd1).unwrap();
    }
}
