//! Write buffer.
//!
//! A capped holding area for recently inserted vectors. Inserts land here
//! first; graph insertion (the expensive operation) happens in bulk when the
//! buffer flushes. While buffered, entries are served to queries by brute
//! force, so a search that begins after an `add` returned always observes
//! the vector.
//!
//! The flush itself lives in the coordinator, which owns the graph and the
//! quantized stores; the buffer only stages entries and answers scans.

use crate::graph::Candidate;
use crate::metadata::Metadata;
use crate::metric::DistanceKind;
use crate::store::{NodeId, StoreError};

/// A buffered insert: id, raw vector, metadata.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    /// The id assigned at insert time.
    pub node_id: NodeId,
    /// The raw vector, also present in the vector store.
    pub vector: Vec<f32>,
    /// Metadata attached at insert time.
    pub metadata: Metadata,
}

/// Capped in-memory holding area for recent inserts.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    entries: Vec<BufferEntry>,
    capacity: usize,
}

impl WriteBuffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the buffer is at capacity. The coordinator flushes a full
    /// buffer before appending the next entry.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AllocationFailed` if the backing buffer cannot
    /// grow.
    pub fn push(&mut self, entry: BufferEntry) -> Result<(), StoreError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| StoreError::AllocationFailed("write_buffer"))?;
        self.entries.push(entry);
        Ok(())
    }

    /// Whether `id` is buffered.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.iter().any(|e| e.node_id == id)
    }

    /// The buffered entry for `id`, if present.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&BufferEntry> {
        self.entries.iter().find(|e| e.node_id == id)
    }

    /// Mutable access to the buffered entry for `id`. Used by upsert.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut BufferEntry> {
        self.entries.iter_mut().find(|e| e.node_id == id)
    }

    /// Removes the entry for `id`. Used by delete of a not-yet-flushed id.
    pub fn remove(&mut self, id: NodeId) -> bool {
        match self.entries.iter().position(|e| e.node_id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Brute-force top-K scan over buffered entries.
    ///
    /// Returns ascending by distance, ties by ascending id.
    #[must_use]
    pub fn search(&self, kind: DistanceKind, query: &[f32], k: usize) -> Vec<Candidate> {
        let mut scored: Vec<Candidate> = self
            .entries
            .iter()
            .map(|e| Candidate {
                distance: kind.distance(query, &e.vector),
                node: e.node_id,
            })
            .collect();
        scored.sort_unstable();
        scored.truncate(k);
        scored
    }

    /// The staged entries, oldest first. The coordinator walks this during
    /// flush.
    #[must_use]
    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    /// Drops the first `count` entries after the coordinator flushed them
    /// into the graph. A partial flush leaves the remainder staged.
    pub fn discard_flushed(&mut self, count: usize) {
        self.entries.drain(..count.min(self.entries.len()));
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries = Vec::new();
    }

    /// Approximate heap bytes held by staged entries.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let vectors: usize = self
            .entries
            .iter()
            .map(|e| {
                e.vector.capacity() * std::mem::size_of::<f32>()
                    + e.metadata
                        .iter()
                        .map(|(k, v)| k.capacity() + v.capacity())
                        .sum::<usize>()
            })
            .sum();
        vectors + self.entries.capacity() * std::mem::size_of::<BufferEntry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, vector: Vec<f32>) -> BufferEntry {
        BufferEntry {
            node_id: NodeId(id),
            vector,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_push_and_capacity() {
        let mut buffer = WriteBuffer::new(2);
        buffer.push(entry(0, vec![0.0])).unwrap();
        assert!(!buffer.is_full());
        buffer.push(entry(1, vec![1.0])).unwrap();
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_brute_force_search_orders_by_distance() {
        let mut buffer = WriteBuffer::new(10);
        buffer.push(entry(0, vec![0.0, 0.0])).unwrap();
        buffer.push(entry(1, vec![3.0, 0.0])).unwrap();
        buffer.push(entry(2, vec![1.0, 0.0])).unwrap();

        let hits = buffer.search(DistanceKind::L2, &[0.9, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node, NodeId(2));
        assert_eq!(hits[1].node, NodeId(0));
    }

    #[test]
    fn test_remove_and_contains() {
        let mut buffer = WriteBuffer::new(10);
        buffer.push(entry(5, vec![1.0])).unwrap();
        assert!(buffer.contains(NodeId(5)));
        assert!(buffer.remove(NodeId(5)));
        assert!(!buffer.contains(NodeId(5)));
        assert!(!buffer.remove(NodeId(5)));
    }

    #[test]
    fn test_discard_flushed_keeps_tail() {
        let mut buffer = WriteBuffer::new(10);
        for i in 0..5 {
            buffer.push(entry(i, vec![f32::from(u8::try_from(i).unwrap())])).unwrap();
        }
        buffer.discard_flushed(3);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.entries()[0].node_id, NodeId(3));
    }
}
