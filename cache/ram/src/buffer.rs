//! Memory buffers: the unit of storage inside a partition.

use bytes::Bytes;

use crate::hash::ObjectType;

/// One cached object: an immutable payload plus bookkeeping.
///
/// The payload is frozen at commit time; only the refcount changes
/// afterwards. Moving a buffer between partitions moves ownership of the
/// payload, it never copies the bytes.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    data: Bytes,
    object_type: ObjectType,
    description: Option<String>,
    refcount: u32,
}

impl MemoryBuffer {
    /// Create a buffer around a frozen payload. The refcount starts at 0.
    pub fn new(data: Bytes, object_type: ObjectType, description: Option<String>) -> Self {
        Self {
            data,
            object_type,
            description,
            refcount: 0,
        }
    }

    /// Exact payload length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of open handles referring to this buffer.
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// The object's type classification.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Optional human-readable label, for listings and diagnostics only.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn set_refcount(&mut self, refcount: u32) {
        self.refcount = refcount;
    }

    /// Metadata snapshot of this buffer.
    pub fn info(&self) -> ObjectInfo {
        ObjectInfo {
            size: self.size(),
            object_type: self.object_type,
            pinned: self.refcount > 0,
            description: self.description.clone(),
        }
    }
}

/// Metadata describing one cached object, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Exact payload length in bytes.
    pub size: usize,
    /// The object's type classification.
    pub object_type: ObjectType,
    /// Whether the object is currently referenced (refcount > 0).
    pub pinned: bool,
    /// Optional human-readable label.
    pub description: Option<String>,
}
