//! Listing cursors.
//!
//! A listing is a snapshot of the whole cache taken at `listing_begin`,
//! filtered by object type and consumed one element at a time. The
//! snapshot is by value: objects committed or evicted afterwards are
//! invisible to an open cursor.

use ram_cache::{ListingEntry, ObjectType};

/// One open listing cursor.
pub struct Listing {
    filter: ObjectType,
    items: Vec<ListingEntry>,
    pos: usize,
}

impl Listing {
    /// Create a cursor over a snapshot, yielding only objects of
    /// `filter` type.
    pub fn new(filter: ObjectType, items: Vec<ListingEntry>) -> Self {
        Self {
            filter,
            items,
            pos: 0,
        }
    }

    /// Advance to the next matching entry, or `None` when exhausted.
    pub fn next(&mut self) -> Option<ListingEntry> {
        while self.pos < self.items.len() {
            let item = &self.items[self.pos];
            self.pos += 1;
            if item.info.object_type == self.filter {
                return Some(item.clone());
            }
        }
        None
    }

    /// The type this cursor yields.
    pub fn filter(&self) -> ObjectType {
        self.filter
    }
}
