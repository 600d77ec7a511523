//! Write transactions: staging buffers for objects under construction.
//!
//! A transaction is owned by the client that started it and is invisible
//! to other threads until commit, so nothing here takes the cache lock.
//! Aborting is simply dropping the value.

use bytes::BytesMut;

use crate::buffer::MemoryBuffer;
use crate::error::{CacheError, CacheResult};
use crate::hash::{ObjectId, ObjectType};

/// Initial staging size when the object size is not known up front.
const TXN_PAGE_SIZE: usize = 4096;

/// An object being assembled, byte by byte, before it enters the cache.
pub struct Transaction {
    id: ObjectId,
    expected_size: Option<usize>,
    pos: usize,
    buffer: BytesMut,
    object_type: ObjectType,
    description: Option<String>,
}

impl Transaction {
    /// Start staging an object.
    ///
    /// When `expected_size` is known the staging buffer is allocated at
    /// full size and writes beyond it fail; when unknown, staging starts
    /// at one page and grows on demand.
    pub fn new(id: ObjectId, expected_size: Option<usize>) -> Self {
        let initial = expected_size.unwrap_or(TXN_PAGE_SIZE);
        Self {
            id,
            expected_size,
            pos: 0,
            buffer: BytesMut::zeroed(initial),
            object_type: ObjectType::default(),
            description: None,
        }
    }

    /// Set the type and description the object will carry once committed.
    pub fn set_control(&mut self, description: Option<String>, object_type: ObjectType) {
        self.description = description;
        self.object_type = object_type;
    }

    /// Append bytes at the current write position.
    ///
    /// With an unknown expected size the staging buffer doubles (at least)
    /// whenever it runs out of room; with a known size a write past the
    /// end fails `NoSpace` without copying anything. Returns the number of
    /// bytes copied.
    pub fn write(&mut self, src: &[u8]) -> CacheResult<usize> {
        let end = self.pos + src.len();
        if end > self.buffer.len() {
            if self.expected_size.is_some() {
                return Err(CacheError::NoSpace);
            }
            let grown = end.max(2 * self.buffer.len());
            self.buffer.resize(grown, 0);
        }
        let count = src.len().min(self.buffer.len() - self.pos);
        self.buffer[self.pos..self.pos + count].copy_from_slice(&src[..count]);
        self.pos += count;
        Ok(count)
    }

    /// Rewind the write position to the beginning; the staging buffer is
    /// reused.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// The id of the object being staged.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Current write position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The type the committed object will carry.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Freeze the staging buffer into a committable [`MemoryBuffer`].
    ///
    /// With a known expected size the object is exactly that size; with
    /// an unknown size the buffer is trimmed to the bytes written.
    pub(crate) fn into_buffer(self) -> MemoryBuffer {
        let mut buffer = self.buffer;
        let final_size = self.expected_size.unwrap_or(self.pos);
        buffer.truncate(final_size);
        MemoryBuffer::new(buffer.freeze(), self.object_type, self.description)
    }
}
