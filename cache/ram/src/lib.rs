//! In-memory content-addressed object cache with pinning semantics.
//!
//! This crate provides the building blocks for a RAM-only cache of
//! immutable blobs keyed by cryptographic digests:
//!
//! - **Ids and types**: opaque fixed-width [`ObjectId`], [`ObjectType`]
//!   classification driving eviction priority
//! - **Buffers**: [`MemoryBuffer`], an immutable payload plus refcount
//! - **Partitions**: [`MemoryKvStore`], a bounded LRU id → buffer map
//!   with byte accounting
//! - **Handles**: [`FdTable`], small-integer handles over pinned objects
//! - **Transactions**: [`Transaction`], caller-owned staging buffers
//! - **Manager**: [`RamCacheManager`], three partitions (pinned /
//!   regular / volatile) behind one lock and one size cap
//!
//! # Architecture
//!
//! ```text
//!                  +-------------------------+
//!                  |     RamCacheManager     |
//!                  | handle table, size cap  |
//!                  +------------+------------+
//!                               |
//!            +------------------+------------------+
//!            v                  v                  v
//!      +----------+       +----------+       +----------+
//!      |  pinned  |       | regular  |       | volatile |
//!      | refcount |       | LRU cold |       | LRU cold |
//!      +----------+       +----------+       +----------+
//! ```
//!
//! Objects enter through transactions, get pinned while open, and evict
//! LRU-first under pressure: volatile before regular, pinned never.
//!
//! # Example
//!
//! ```
//! use ram_cache::{ObjectId, ObjectType, RamCacheManager};
//!
//! let cache = RamCacheManager::builder()
//!     .max_size(64 * 1024 * 1024)
//!     .build();
//!
//! let id = ObjectId::from_bytes([0x17; 32]);
//! let mut txn = cache.start_txn(id, Some(5));
//! txn.set_control(Some("greeting".to_string()), ObjectType::Regular);
//! txn.write(b"hello")?;
//! cache.commit_txn(txn)?;
//!
//! let fd = cache.open(id)?;
//! let mut buf = [0u8; 5];
//! assert_eq!(cache.pread(fd, &mut buf, 0)?, 5);
//! assert_eq!(&buf, b"hello");
//! cache.close(fd)?;
//! # Ok::<(), ram_cache::CacheError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod error;
mod fd_table;
mod hash;
mod kvstore;
mod manager;
mod transaction;

pub mod metrics;

pub use buffer::{MemoryBuffer, ObjectInfo};
pub use error::{CacheError, CacheResult};
pub use fd_table::{DEFAULT_HANDLE_LIMIT, FdTable};
pub use hash::{OBJECT_ID_LEN, ObjectId, ObjectType};
pub use kvstore::MemoryKvStore;
pub use manager::{
    CacheInfo, CacheUsage, ListingEntry, RamCacheManager, RamCacheManagerBuilder,
};
pub use transaction::Transaction;
