//! Object identifiers and object types.
//!
//! Every cache entry is keyed by a fixed-width cryptographic digest. The
//! cache treats the digest as opaque: it never hashes content itself and
//! never verifies that a payload matches its id.

use std::fmt;

/// Width of an object id in bytes.
pub const OBJECT_ID_LEN: usize = 32;

/// A fixed-width opaque digest identifying one immutable object.
///
/// Ids are totally ordered (byte-lexicographic) so they can key ordered
/// maps, and hashable so they can key hash maps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Create an id from a raw digest.
    pub const fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an id from a byte slice.
    ///
    /// Returns `None` if the slice is not exactly [`OBJECT_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let digest: [u8; OBJECT_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(digest))
    }

    /// The raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight leading bytes are plenty to tell ids apart in logs.
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// Classification of a cached object, driving partition placement and
/// eviction priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectType {
    /// Ordinary data object; evictable once unreferenced.
    #[default]
    Regular,
    /// Short-lived object; evicted before any regular object.
    Volatile,
    /// Explicitly pinned object; never evicted.
    Pinned,
    /// File catalog; never evicted.
    Catalog,
}

impl ObjectType {
    /// Whether objects of this type may be evicted under pressure.
    ///
    /// Pinned and catalog objects stay in the pinned partition for their
    /// whole lifetime, even with no open handles.
    pub fn is_evictable(&self) -> bool {
        matches!(self, ObjectType::Regular | ObjectType::Volatile)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Regular => write!(f, "regular"),
            ObjectType::Volatile => write!(f, "volatile"),
            ObjectType::Pinned => write!(f, "pinned"),
            ObjectType::Catalog => write!(f, "catalog"),
        }
    }
}
