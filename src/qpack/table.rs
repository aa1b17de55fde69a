//! QPACK dynamic table
//!
//! Entries are addressed by absolute index: the first entry ever inserted is
//! 0 and indices never shift. The oldest live entry is at the front of the
//! queue and has absolute index `insert_count - len`.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::constants::qpack::ENTRY_OVERHEAD;
use crate::rcbuf::RcBuf;

/// Dynamic table entry
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: Bytes,
    pub value: Bytes,
}

impl Entry {
    /// Entry size (name + value + 32 per RFC 9204)
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }

    /// Shared buffers for handing the entry to the application
    pub fn to_rcbuf(&self) -> (RcBuf, RcBuf) {
        (RcBuf::new(self.name.clone()), RcBuf::new(self.value.clone()))
    }
}

/// Size an entry with this name and value would take
pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// QPACK dynamic table
#[derive(Debug, Default)]
pub struct DynamicTable {
    /// Live entries, oldest first
    entries: VecDeque<Entry>,
    /// Current size in bytes
    size: usize,
    /// Capacity in bytes
    capacity: usize,
    /// Total number of inserts ever made
    insert_count: u64,
}

impl DynamicTable {
    /// Create an empty table with zero capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of inserts
    pub fn insert_count(&self) -> u64 {
        self.insert_count
    }

    /// Bytes available without evicting
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.size)
    }

    /// Set capacity, evicting from the oldest end as needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_to(capacity);
    }

    /// Insert an entry, evicting older ones to make room
    ///
    /// Returns `false` if the entry is larger than the whole table.
    pub fn insert(&mut self, name: Bytes, value: Bytes) -> bool {
        let entry = Entry { name, value };
        let size = entry.size();
        if size > self.capacity {
            return false;
        }

        self.evict_to(self.capacity - size);
        self.size += size;
        self.entries.push_back(entry);
        self.insert_count += 1;
        true
    }

    /// Get an entry by absolute index
    pub fn get(&self, absolute: u64) -> Option<&Entry> {
        let dropped = self.insert_count - self.entries.len() as u64;
        let offset = absolute.checked_sub(dropped)?;
        self.entries.get(usize::try_from(offset).ok()?)
    }

    /// Find an entry, newest first, preferring an exact match
    ///
    /// Returns the absolute index and whether the value matched too. Only
    /// entries below `limit` (an absolute index bound) are considered.
    pub fn find(&self, name: &[u8], value: &[u8], limit: u64) -> Option<(u64, bool)> {
        let dropped = self.insert_count - self.entries.len() as u64;
        let mut name_match = None;

        for (offset, entry) in self.entries.iter().enumerate().rev() {
            let absolute = dropped + offset as u64;
            if absolute >= limit || entry.name != name {
                continue;
            }
            if entry.value == value {
                return Some((absolute, true));
            }
            name_match.get_or_insert((absolute, false));
        }
        name_match
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_front() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }
}
