//! The callback vocabulary exposed to out-of-process clients.
//!
//! The vocabulary is a fixed, finite set of operations, modeled as one
//! trait ([`CacheCallbacks`]) that the transport layer drives: a
//! capability record rather than an inheritance hierarchy. Each operation
//! is atomic from the caller's point of view. [`RamCachePlugin`] is the
//! implementation over [`RamCacheManager`]; it owns the transaction and
//! listing tables, which are keyed by caller-chosen ids on the wire, and
//! delegates everything else.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use ram_cache::{
    CacheError, CacheResult, ListingEntry, ObjectId, ObjectInfo, ObjectType, RamCacheManager,
    Transaction,
};

use crate::listing::Listing;

bitflags::bitflags! {
    /// Features a cache plugin may advertise to its host.
    ///
    /// A host that advertises a subset may omit the corresponding
    /// callbacks; this implementation supports all of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        /// Clients may pin and release objects (`chrefcnt`).
        const REFCOUNT = 1 << 0;
        /// Clients may shrink the cache on demand (`shrink`).
        const SHRINK = 1 << 1;
        /// Per-object metadata queries (`obj_info`).
        const OBJECT_INFO = 1 << 2;
        /// Aggregate state queries (`info`).
        const INFO = 1 << 3;
        /// Typed listings of the whole cache (`listing_*`).
        const LISTING = 1 << 4;
    }
}

/// Aggregate cache state as reported over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    /// Advertised capacity; `u64::MAX` when no cap is advertised.
    pub size_bytes: u64,
    /// Payload bytes currently held.
    pub used_bytes: u64,
    /// Payload bytes held by objects with at least one reference.
    pub pinned_bytes: u64,
    /// Whether the cache refuses shrink requests; always false here.
    pub no_shrink: bool,
}

/// The plugin callback vocabulary.
///
/// All operational failures come back as status codes; nothing panics
/// across this boundary except internal invariant violations, which abort
/// the process.
pub trait CacheCallbacks: Send + Sync {
    /// The capabilities this plugin implements.
    fn capabilities(&self) -> Capabilities;

    /// Add `change_by` to the refcount of the object at `id`.
    fn chrefcnt(&self, id: ObjectId, change_by: i64) -> CacheResult<()>;

    /// Metadata of the object at `id`.
    fn obj_info(&self, id: ObjectId) -> CacheResult<ObjectInfo>;

    /// Read up to `dst.len()` bytes at `offset` from the object at `id`.
    ///
    /// Returns the number of bytes copied; a read exactly at the end of
    /// the object copies 0 bytes and succeeds.
    fn pread(&self, id: ObjectId, offset: usize, dst: &mut [u8]) -> CacheResult<usize>;

    /// Start staging an object under the caller-chosen `txn_id`.
    fn start_txn(
        &self,
        txn_id: u64,
        id: ObjectId,
        object_type: ObjectType,
        description: Option<String>,
    ) -> CacheResult<()>;

    /// Append bytes to the transaction at `txn_id`.
    fn write_txn(&self, txn_id: u64, data: &[u8]) -> CacheResult<usize>;

    /// Commit the transaction at `txn_id` into the cache.
    fn commit_txn(&self, txn_id: u64) -> CacheResult<()>;

    /// Drop the transaction at `txn_id` and its staging buffer. Aborting
    /// an unknown transaction is a no-op.
    fn abort_txn(&self, txn_id: u64) -> CacheResult<()>;

    /// Aggregate cache state.
    fn info(&self) -> PluginInfo;

    /// Evict unreferenced objects down to `target` bytes: volatile
    /// first, then regular, never pinned.
    ///
    /// Writes the payload bytes still held into `used` either way.
    /// Fails `Partial` when the target was not reached; the client
    /// should pin less and try again later.
    fn shrink(&self, target: u64, used: &mut u64) -> CacheResult<()>;

    /// Snapshot the cache into a cursor at the caller-chosen
    /// `listing_id`, yielding objects of `object_type` only.
    fn listing_begin(&self, listing_id: u64, object_type: ObjectType) -> CacheResult<()>;

    /// The next entry of the listing at `listing_id`, or `OutOfBounds`
    /// when the cursor is exhausted.
    fn listing_next(&self, listing_id: u64) -> CacheResult<ListingEntry>;

    /// Destroy the listing at `listing_id`.
    fn listing_end(&self, listing_id: u64) -> CacheResult<()>;
}

/// [`CacheCallbacks`] over a [`RamCacheManager`].
pub struct RamCachePlugin {
    cache: Arc<RamCacheManager>,
    transactions: Mutex<HashMap<u64, Transaction, ahash::RandomState>>,
    listings: Mutex<HashMap<u64, Listing, ahash::RandomState>>,
}

impl RamCachePlugin {
    /// Wrap a cache manager.
    pub fn new(cache: Arc<RamCacheManager>) -> Self {
        Self {
            cache,
            transactions: Mutex::new(HashMap::default()),
            listings: Mutex::new(HashMap::default()),
        }
    }

    /// The cache this plugin serves.
    pub fn cache(&self) -> &RamCacheManager {
        &self.cache
    }
}

impl CacheCallbacks for RamCachePlugin {
    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn chrefcnt(&self, id: ObjectId, change_by: i64) -> CacheResult<()> {
        self.cache.change_refcount(id, change_by)
    }

    fn obj_info(&self, id: ObjectId) -> CacheResult<ObjectInfo> {
        self.cache.object_info(id)
    }

    fn pread(&self, id: ObjectId, offset: usize, dst: &mut [u8]) -> CacheResult<usize> {
        self.cache.read_object(id, dst, offset)
    }

    fn start_txn(
        &self,
        txn_id: u64,
        id: ObjectId,
        object_type: ObjectType,
        description: Option<String>,
    ) -> CacheResult<()> {
        // The wire streams bytes without announcing a size up front.
        let mut txn = self.cache.start_txn(id, None);
        txn.set_control(description, object_type);
        if let Some(stale) = self.transactions.lock().insert(txn_id, txn) {
            tracing::warn!(txn_id, id = %stale.id(), "transaction id reused, dropping stale staging");
        }
        Ok(())
    }

    fn write_txn(&self, txn_id: u64, data: &[u8]) -> CacheResult<usize> {
        let mut transactions = self.transactions.lock();
        let txn = transactions.get_mut(&txn_id).ok_or(CacheError::NoEntry)?;
        txn.write(data)
    }

    fn commit_txn(&self, txn_id: u64) -> CacheResult<()> {
        let txn = self
            .transactions
            .lock()
            .remove(&txn_id)
            .ok_or(CacheError::NoEntry)?;
        self.cache.commit_txn(txn)
    }

    fn abort_txn(&self, txn_id: u64) -> CacheResult<()> {
        self.transactions.lock().remove(&txn_id);
        Ok(())
    }

    fn info(&self) -> PluginInfo {
        let info = self.cache.info();
        PluginInfo {
            size_bytes: if info.max_size == usize::MAX {
                u64::MAX
            } else {
                info.max_size as u64
            },
            used_bytes: info.used_bytes as u64,
            pinned_bytes: info.pinned_bytes as u64,
            no_shrink: false,
        }
    }

    fn shrink(&self, target: u64, used: &mut u64) -> CacheResult<()> {
        let target = usize::try_from(target).unwrap_or(usize::MAX);
        let result = self.cache.shrink(target);
        *used = match result {
            Ok(after) => after as u64,
            Err(_) => self.cache.usage().total() as u64,
        };
        result.map(|_| ())
    }

    fn listing_begin(&self, listing_id: u64, object_type: ObjectType) -> CacheResult<()> {
        let snapshot = self.cache.snapshot();
        self.listings
            .lock()
            .insert(listing_id, Listing::new(object_type, snapshot));
        Ok(())
    }

    fn listing_next(&self, listing_id: u64) -> CacheResult<ListingEntry> {
        let mut listings = self.listings.lock();
        let listing = listings.get_mut(&listing_id).ok_or(CacheError::NoEntry)?;
        listing.next().ok_or(CacheError::OutOfBounds)
    }

    fn listing_end(&self, listing_id: u64) -> CacheResult<()> {
        self.listings
            .lock()
            .remove(&listing_id)
            .map(|_| ())
            .ok_or(CacheError::NoEntry)
    }
}
