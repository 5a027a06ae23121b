//! Index coordinator — the public façade.
//!
//! Owns every sub-store and routes the public operations: validation and id
//! mapping at the boundary, buffered inserts funneled into the graph by
//! flush, merged graph-plus-buffer search, and checkpoint/recovery.
//!
//! # Concurrency
//!
//! One writer XOR many readers, serialized here and expressed directly in
//! the type system: mutating operations take `&mut self`, queries take
//! `&self`. A torn neighbor-list read is impossible by construction. Callers
//! that need concurrent readers wrap the index in `std::sync::RwLock`.

use std::collections::HashMap;

use bitvec::prelude::*;
use std::path::PathBuf;

mod config;
mod stats;

pub use config::{IndexOptions, QuantizationMode};
pub use stats::{IndexStats, MemoryBreakdown};

use crate::buffer::{BufferEntry, WriteBuffer};
use crate::error::IndexError;
use crate::graph::{
    DistanceView, GraphNode, GraphParams, ProximityGraph, QueryDistance, SearchContext,
};
use crate::metadata::{Filter, Metadata, MetadataStore};
use crate::metric::{hamming, quantized, DistanceKind};
use crate::persistence::format::{self, GraphFile, GraphNodeRecord, MetaRecord};
use crate::persistence::wal::{
    self, decode_delete_payload, decode_write_payload, encode_delete_payload,
    encode_write_payload, OP_ADD, OP_DELETE, OP_UPSERT,
};
use crate::persistence::{CheckpointPaths, PersistenceError, WalWriter};
use crate::store::{binary, BinaryQuantStore, NodeId, ScalarQuantStore, VectorStore};

/// One search result: external id, distance, metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    /// The caller-chosen id of the matched vector.
    pub id: String,
    /// Distance to the query under the configured distance function. With
    /// quantization enabled this is the quantized approximation for
    /// graph-resident vectors and exact for still-buffered ones.
    pub distance: f32,
    /// Metadata attached to the matched vector.
    pub metadata: Metadata,
}

/// Bidirectional external-internal id map.
#[derive(Debug, Clone, Default)]
struct IdMap {
    forward: HashMap<String, NodeId>,
    /// Slot per assigned id; `None` marks a tombstone.
    reverse: Vec<Option<String>>,
}

impl IdMap {
    fn get(&self, external: &str) -> Option<NodeId> {
        self.forward.get(external).copied()
    }

    fn external_of(&self, id: NodeId) -> Option<&str> {
        self.reverse.get(id.index()).and_then(Option::as_deref)
    }

    fn insert(&mut self, external: String, id: NodeId) {
        debug_assert_eq!(id.index(), self.reverse.len());
        self.forward.insert(external.clone(), id);
        self.reverse.push(Some(external));
    }

    fn remove(&mut self, external: &str) -> Option<NodeId> {
        let id = self.forward.remove(external)?;
        self.reverse[id.index()] = None;
        Some(id)
    }

    fn len(&self) -> usize {
        self.forward.len()
    }

    fn clear(&mut self) {
        self.forward = HashMap::new();
        self.reverse = Vec::new();
    }

    fn memory_usage(&self) -> usize {
        let forward: usize = self
            .forward
            .keys()
            .map(|k| k.capacity() + std::mem::size_of::<NodeId>())
            .sum();
        let reverse: usize = self.reverse.iter().flatten().map(String::capacity).sum();
        forward + reverse + self.reverse.capacity() * std::mem::size_of::<Option<String>>()
    }
}

/// An embedded vector similarity search index.
///
/// Inserts land in a capped write buffer and are served by brute force
/// until a flush moves them into the proximity graph; searches merge both
/// regions and return the top K. One index instance is independent of every
/// other: no global state is shared.
#[derive(Debug)]
pub struct VectorIndex {
    options: IndexOptions,
    /// Set by the first successful insert, immutable afterwards.
    dims: Option<usize>,
    /// Whether the first insert has frozen the configuration.
    frozen: bool,
    vectors: VectorStore,
    sq8: Option<ScalarQuantStore>,
    binary: Option<BinaryQuantStore>,
    buffer: WriteBuffer,
    graph: ProximityGraph,
    ids: IdMap,
    metadata: MetadataStore,
    paths: Option<CheckpointPaths>,
    wal: Option<WalWriter>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Creates an index with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::bare(IndexOptions::default().clamped())
    }

    /// Creates an index with the given options. Out-of-range values are
    /// clamped into their documented ranges.
    ///
    /// This never reads existing checkpoint files; use [`Self::open`] to
    /// resume from disk.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceDisabled` if `use_wal` is set without a
    /// persistence path, or an `Io` error if the log cannot be opened.
    pub fn with_options(options: IndexOptions) -> Result<Self, IndexError> {
        let mut index = Self::bare(options.clamped());
        index.attach_wal()?;
        Ok(index)
    }

    /// Opens an index from its persistence path, recovering the last
    /// checkpoint and replaying the write-ahead log.
    ///
    /// If any of the three checkpoint files is absent the index starts
    /// empty at the configured path.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceDisabled` without a persistence path,
    /// `CorruptState` if a file fails validation, or `Io` on read failure.
    pub fn open(options: IndexOptions) -> Result<Self, IndexError> {
        let mut index = Self::bare(options.clamped());
        let Some(paths) = index.paths.clone() else {
            return Err(IndexError::PersistenceDisabled);
        };

        if paths.checkpoint_complete() {
            index.load_checkpoint(&paths)?;
            log::info!(
                "recovered {} vectors from {}",
                index.count(),
                paths.vectors.display()
            );
        } else if paths.any_present() {
            log::warn!(
                "incomplete checkpoint at {}: starting empty",
                paths.vectors.display()
            );
        }

        if index.options.use_wal {
            index.replay_wal(&paths)?;
        }
        index.attach_wal()?;
        Ok(index)
    }

    fn bare(options: IndexOptions) -> Self {
        let paths = options
            .persistence_path
            .as_deref()
            .map(CheckpointPaths::new);
        Self {
            graph: ProximityGraph::new(options.graph_params(), options.seed),
            buffer: WriteBuffer::new(options.buffer_capacity),
            vectors: VectorStore::new(0),
            dims: None,
            frozen: false,
            sq8: None,
            binary: None,
            ids: IdMap::default(),
            metadata: MetadataStore::new(),
            paths,
            wal: None,
            options,
        }
    }

    fn attach_wal(&mut self) -> Result<(), IndexError> {
        if !self.options.use_wal {
            return Ok(());
        }
        let Some(paths) = &self.paths else {
            return Err(IndexError::PersistenceDisabled);
        };
        self.wal = Some(WalWriter::open(&paths.wal)?);
        Ok(())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Replaces the configuration.
    ///
    /// Before the first insert any option may change. Afterwards only
    /// `ef_search` is mutable; any other difference fails with
    /// `ConfigurationFrozen` naming the option.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationFrozen`, `PersistenceDisabled`, or `Io` (when
    /// re-opening the write-ahead log).
    pub fn configure(&mut self, options: IndexOptions) -> Result<(), IndexError> {
        let options = options.clamped();
        if self.frozen {
            let frozen_option = self.first_frozen_difference(&options);
            if let Some(name) = frozen_option {
                return Err(IndexError::ConfigurationFrozen(name));
            }
            self.options.ef_search = options.ef_search;
            return Ok(());
        }

        let paths = options
            .persistence_path
            .as_deref()
            .map(CheckpointPaths::new);
        self.options = options;
        self.paths = paths;
        self.graph = ProximityGraph::new(self.options.graph_params(), self.options.seed);
        self.buffer = WriteBuffer::new(self.options.buffer_capacity);
        self.wal = None;
        self.attach_wal()
    }

    fn first_frozen_difference(&self, options: &IndexOptions) -> Option<&'static str> {
        let current = &self.options;
        if options.distance != current.distance {
            return Some("distance");
        }
        if options.m != current.m {
            return Some("m");
        }
        if options.resolved_m_max0() != current.resolved_m_max0() {
            return Some("m_max0");
        }
        if options.ef_construction != current.ef_construction {
            return Some("ef_construction");
        }
        if options.buffer_capacity != current.buffer_capacity {
            return Some("buffer_capacity");
        }
        if options.quantization != current.quantization {
            return Some("quantization");
        }
        if options.seed != current.seed {
            return Some("seed");
        }
        if options.persistence_path != current.persistence_path {
            return Some("persistence_path");
        }
        if options.use_wal != current.use_wal {
            return Some("use_wal");
        }
        None
    }

    /// Updates the query-time candidate pool width. Allowed at any time.
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.options.ef_search = config::clamp_ef_search(ef_search);
    }

    /// The active configuration, with clamped values and resolved `m_max0`.
    #[must_use]
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The inferred dimension; `None` before the first insert.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dims
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a new vector under `external_id`.
    ///
    /// The first successful insert fixes the index dimension. The insert
    /// lands in the write buffer; a full buffer is flushed into the graph
    /// first, which blocks the caller for the duration of the flush.
    ///
    /// # Errors
    ///
    /// `EmptyId`, `EmptyVector`, `InvalidVector` (NaN or infinite
    /// components), `DimensionMismatch`, `DuplicateId`, or a propagated
    /// flush/WAL failure. State is unchanged on validation errors.
    pub fn add(
        &mut self,
        external_id: impl Into<String>,
        vector: &[f32],
        metadata: Option<Metadata>,
    ) -> Result<(), IndexError> {
        let external_id = external_id.into();
        self.validate_write(&external_id, vector)?;
        if self.ids.get(&external_id).is_some() {
            return Err(IndexError::DuplicateId(external_id));
        }
        let metadata = metadata.unwrap_or_default();

        if self.buffer.is_full() {
            self.flush_buffer()?;
        }
        self.init_dimension(vector.len())?;

        if let Some(wal) = &mut self.wal {
            wal.append(OP_ADD, &encode_write_payload(&external_id, vector, &metadata))?;
        }

        let node_id = self.vectors.push(vector)?;
        self.ids.insert(external_id, node_id);
        self.metadata.push(metadata.clone());
        self.buffer.push(BufferEntry {
            node_id,
            vector: vector.to_vec(),
            metadata,
        })?;
        Ok(())
    }

    /// Inserts or replaces the vector under `external_id`.
    ///
    /// An existing entry has its vector and metadata overwritten in place
    /// (re-quantizing if a quantized store is active); the graph topology is
    /// not rebuilt. A new id behaves like [`Self::add`]. Returns `true` when
    /// the id was new.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add`], except `DuplicateId` which upsert never
    /// produces.
    pub fn upsert(
        &mut self,
        external_id: impl Into<String>,
        vector: &[f32],
        metadata: Option<Metadata>,
    ) -> Result<bool, IndexError> {
        let external_id = external_id.into();
        self.validate_write(&external_id, vector)?;

        let Some(node_id) = self.ids.get(&external_id) else {
            self.add(external_id, vector, metadata)?;
            return Ok(true);
        };
        let metadata = metadata.unwrap_or_default();

        if let Some(wal) = &mut self.wal {
            wal.append(
                OP_UPSERT,
                &encode_write_payload(&external_id, vector, &metadata),
            )?;
        }

        self.vectors.overwrite(node_id, vector);
        self.metadata.set(node_id, metadata.clone());

        if let Some(entry) = self.buffer.get_mut(node_id) {
            entry.vector = vector.to_vec();
            entry.metadata = metadata;
        } else {
            // Graph-resident: refresh the quantized representations.
            if let Some(sq8) = self.sq8.as_mut() {
                sq8.set(node_id, vector)?;
            }
            if let Some(bin) = self.binary.as_mut() {
                bin.set(node_id, vector)?;
            }
        }
        Ok(false)
    }

    /// Inserts a batch of `(id, vector, metadata)` triples.
    ///
    /// Every entry is validated before anything is inserted; a validation
    /// failure aborts the whole batch with state unchanged. Insertion then
    /// proceeds in order, skipping ids that already exist, and returns the
    /// ids actually inserted. Flushes may trigger mid-batch.
    ///
    /// # Errors
    ///
    /// Validation errors as in [`Self::add`], or a propagated flush/WAL
    /// failure mid-insertion (already-inserted entries remain).
    pub fn add_batch(
        &mut self,
        items: Vec<(String, Vec<f32>, Option<Metadata>)>,
    ) -> Result<Vec<String>, IndexError> {
        // Validate everything first: all-or-nothing at validation time.
        let expected = self.dims.or_else(|| items.first().map(|(_, v, _)| v.len()));
        for (external_id, vector, _) in &items {
            self.validate_write(external_id, vector)?;
            if let Some(expected) = expected {
                if vector.len() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        got: vector.len(),
                    });
                }
            }
        }

        let mut inserted = Vec::with_capacity(items.len());
        for (external_id, vector, metadata) in items {
            match self.add(external_id.clone(), &vector, metadata) {
                Ok(()) => inserted.push(external_id),
                Err(IndexError::DuplicateId(id)) => {
                    log::debug!("add_batch: skipping duplicate id {id:?}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    /// Removes the entry under `external_id`. Returns whether one existed.
    ///
    /// The slot is tombstoned, never recycled: the raw vector stays in its
    /// slot, graph neighbors keep their references, and every traversal
    /// skips the id from now on.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the WAL append fails.
    pub fn delete(&mut self, external_id: &str) -> Result<bool, IndexError> {
        let Some(node_id) = self.ids.get(external_id) else {
            return Ok(false);
        };

        if let Some(wal) = &mut self.wal {
            wal.append(OP_DELETE, &encode_delete_payload(external_id))?;
        }

        self.ids.remove(external_id);
        self.metadata.remove(node_id);
        self.vectors.tombstone(node_id);
        if !self.buffer.remove(node_id) {
            self.graph.tombstone(node_id);
        }
        if let Some(sq8) = self.sq8.as_mut() {
            sq8.remove(node_id);
        }
        if let Some(bin) = self.binary.as_mut() {
            bin.remove(node_id);
        }
        Ok(true)
    }

    /// Resets the index to its initial empty state. The dimension becomes
    /// unset and the configuration thaws.
    ///
    /// # Errors
    ///
    /// Returns `Io` if truncating the write-ahead log fails.
    pub fn clear(&mut self) -> Result<(), IndexError> {
        self.vectors = VectorStore::new(0);
        self.sq8 = None;
        self.binary = None;
        self.buffer = WriteBuffer::new(self.options.buffer_capacity);
        self.graph = ProximityGraph::new(self.options.graph_params(), self.options.seed);
        self.ids.clear();
        self.metadata.clear();
        self.dims = None;
        self.frozen = false;
        // A WAL surviving a clear would resurrect the dropped entries on
        // the next open.
        if let Some(wal) = &mut self.wal {
            wal.truncate()?;
        }
        Ok(())
    }

    /// Synchronously flushes the write buffer into the graph.
    ///
    /// A failed graph insert aborts the flush: entries already moved stay
    /// in the graph, the failed and later entries stay buffered for retry.
    ///
    /// # Errors
    ///
    /// Propagates the first insert failure.
    pub fn flush(&mut self) -> Result<(), IndexError> {
        self.flush_buffer()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Top-K nearest-neighbor search.
    ///
    /// Queries the graph and the write buffer independently, merges, applies
    /// the filter, and returns up to `k` results ascending by distance (ties
    /// by insertion order).
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` or `InvalidVector` for a malformed query.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchMatch>, IndexError> {
        self.search_with_ef(query, k, self.options.ef_search, filter)
    }

    /// [`Self::search`] with a per-query candidate pool width.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` or `InvalidVector` for a malformed query.
    pub fn search_with_ef(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchMatch>, IndexError> {
        let Some(dims) = self.dims else {
            return Ok(Vec::new());
        };
        if query.len() != dims {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                got: query.len(),
            });
        }
        if let Some(reason) = invalid_component(query) {
            return Err(IndexError::InvalidVector(reason));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let kind = self.options.distance;
        let ef = k.max(config::clamp_ef_search(ef_search));
        let mut ctx = SearchContext::new();

        let mut merged = match (self.options.quantization, &self.sq8, &self.binary) {
            (QuantizationMode::Scalar8, Some(store), _) => {
                let view = Sq8QueryView { kind, query, store };
                self.graph.search(&view, k, ef, &mut ctx)?
            }
            (QuantizationMode::Binary, _, Some(store)) => {
                let mut bits = vec![0u8; binary::packed_len(dims)];
                binary::pack_signs(query, &mut bits);
                let view = BinaryQueryView {
                    kind,
                    bits,
                    norm: binary::l2_norm(query),
                    store,
                    dims,
                };
                self.graph.search(&view, k, ef, &mut ctx)?
            }
            _ => {
                let view = RawQueryView {
                    kind,
                    query,
                    vectors: &self.vectors,
                };
                self.graph.search(&view, k, ef, &mut ctx)?
            }
        };

        merged.extend(self.buffer.search(kind, query, k));
        merged.sort_unstable();

        let mut out = Vec::with_capacity(k.min(merged.len()));
        for candidate in merged {
            if out.len() == k {
                break;
            }
            let Some(external) = self.ids.external_of(candidate.node) else {
                continue;
            };
            let metadata = self.metadata.get(candidate.node);
            if filter.is_some_and(|f| !f.matches(metadata)) {
                continue;
            }
            out.push(SearchMatch {
                id: external.to_string(),
                distance: candidate.distance,
                metadata: metadata.clone(),
            });
        }
        Ok(out)
    }

    /// Returns the vector and metadata stored under `external_id`.
    #[must_use]
    pub fn get(&self, external_id: &str) -> Option<(Vec<f32>, Metadata)> {
        let node_id = self.ids.get(external_id)?;
        Some((
            self.vectors.get(node_id).to_vec(),
            self.metadata.get(node_id).clone(),
        ))
    }

    /// Whether `external_id` is present.
    #[must_use]
    pub fn contains(&self, external_id: &str) -> bool {
        self.ids.get(external_id).is_some()
    }

    /// Number of live (non-tombstoned) entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// A snapshot of counts, fill levels and per-component byte usage.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.count(),
            dimension: self.dims,
            buffer_len: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            graph_nodes: self.graph.node_count(),
            graph_top_layer: self.graph.top_layer(),
            memory: MemoryBreakdown {
                vectors: self.vectors.memory_usage(),
                scalar8: self.sq8.as_ref().map_or(0, ScalarQuantStore::memory_usage),
                binary: self.binary.as_ref().map_or(0, BinaryQuantStore::memory_usage),
                graph: self.graph.memory_usage(),
                id_map: self.ids.memory_usage(),
                metadata: self.metadata.memory_usage(),
                buffer: self.buffer.memory_usage(),
            },
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes a checkpoint to the configured base path.
    ///
    /// The buffer is flushed first, each file is written to a temporary
    /// sibling and renamed into place, and the write-ahead log is truncated
    /// last. A failure never corrupts the in-memory index or the previous
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// `PersistenceDisabled` without a configured path, or a propagated
    /// flush/`Io` failure.
    pub fn checkpoint(&mut self) -> Result<(), IndexError> {
        let Some(paths) = self.paths.clone() else {
            return Err(IndexError::PersistenceDisabled);
        };
        self.flush_buffer()?;

        let Some(dims) = self.dims else {
            // Nothing inserted yet: an empty index persists as no files.
            for path in [&paths.vectors, &paths.graph, &paths.meta] {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(IndexError::Io {
                            path: path.clone(),
                            source,
                        })
                    }
                }
            }
            if let Some(wal) = &mut self.wal {
                wal.truncate()?;
            }
            return Ok(());
        };

        let dims_u32 = u32::try_from(dims).expect("dimension fits in u32");
        format::write_vectors(&paths.vectors, dims_u32, self.vectors.raw_rows())?;
        format::write_graph(&paths.graph, &self.graph_file())?;
        format::write_meta(&paths.meta, &self.meta_records())?;

        if let Some(wal) = &mut self.wal {
            wal.truncate()?;
        }
        log::info!(
            "checkpoint of {} vectors written to {}",
            self.count(),
            paths.vectors.display()
        );
        Ok(())
    }

    /// Flushes, checkpoints (when persistence is configured), and releases
    /// the index.
    ///
    /// # Errors
    ///
    /// Propagates flush and checkpoint failures.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.flush_buffer()?;
        if self.paths.is_some() {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn graph_file(&self) -> GraphFile {
        GraphFile {
            m: u16::try_from(self.options.m).expect("m bounded by 64"),
            m_max0: u16::try_from(self.options.resolved_m_max0()).expect("m_max0 bounded by 256"),
            top_layer: u16::from(self.graph.top_layer()),
            entry_point: self.graph.entry_point().map_or(0, |id| u64::from(id.0)),
            nodes: self
                .graph
                .iter_nodes()
                .map(|(id, node)| GraphNodeRecord {
                    node_id: u64::from(id.0),
                    layers: (0..=node.top_layer())
                        .map(|layer| {
                            node.neighbors(layer)
                                .iter()
                                .map(|n| u64::from(n.0))
                                .collect()
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn meta_records(&self) -> Vec<MetaRecord> {
        let mut records = Vec::with_capacity(self.count());
        for slot in 0..self.vectors.len() {
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(slot as u32);
            let Some(external) = self.ids.external_of(id) else {
                continue;
            };
            let mut entries: Vec<(String, String)> = self
                .metadata
                .get(id)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            entries.sort();
            records.push(MetaRecord {
                node_id: slot as u64,
                external_id: external.to_string(),
                entries,
            });
        }
        records
    }

    fn load_checkpoint(&mut self, paths: &CheckpointPaths) -> Result<(), IndexError> {
        let corrupt = |reason: &str, file: &PathBuf| {
            IndexError::from(PersistenceError::Corrupt {
                reason: reason.to_string(),
                file: Some(file.clone()),
            })
        };

        let (dims_u32, rows) = format::read_vectors(&paths.vectors)?;
        let dims = dims_u32 as usize;
        if rows.len() % dims != 0 {
            return Err(corrupt("vector payload not a multiple of dims", &paths.vectors));
        }
        let slot_count = rows.len() / dims;

        // Meta: id map, metadata, liveness.
        let meta_records = format::read_meta(&paths.meta)?;
        let mut forward = HashMap::with_capacity(meta_records.len());
        let mut reverse: Vec<Option<String>> = vec![None; slot_count];
        let mut metadata_slots: Vec<Metadata> = vec![Metadata::new(); slot_count];
        for record in meta_records {
            let slot = usize::try_from(record.node_id)
                .ok()
                .filter(|&s| s < slot_count)
                .ok_or_else(|| corrupt("meta node_id out of range", &paths.meta))?;
            if reverse[slot].is_some() {
                return Err(corrupt("duplicate meta node_id", &paths.meta));
            }
            if record.external_id.is_empty() {
                return Err(corrupt("empty external id", &paths.meta));
            }
            #[allow(clippy::cast_possible_truncation)]
            let prev = forward.insert(record.external_id.clone(), NodeId(slot as u32));
            if prev.is_some() {
                return Err(corrupt("duplicate external id", &paths.meta));
            }
            reverse[slot] = Some(record.external_id);
            metadata_slots[slot] = record.entries.into_iter().collect();
        }

        let mut tombstones = BitVec::repeat(false, slot_count);
        for (slot, external) in reverse.iter().enumerate() {
            if external.is_none() {
                tombstones.set(slot, true);
            }
        }

        // Graph: topology, liveness from the meta file.
        let graph_file = format::read_graph(&paths.graph)?;
        let m = usize::from(graph_file.m);
        let m_max0 = usize::from(graph_file.m_max0);
        if m < 2 || m_max0 < m {
            return Err(corrupt("implausible m/m_max0", &paths.graph));
        }
        let top_layer = u8::try_from(graph_file.top_layer)
            .map_err(|_| corrupt("top layer out of range", &paths.graph))?;

        let mut records = Vec::with_capacity(graph_file.nodes.len());
        let mut deleted_ids = Vec::new();
        let mut resident = bitvec![0; slot_count];
        for node in graph_file.nodes {
            let slot = usize::try_from(node.node_id)
                .ok()
                .filter(|&s| s < slot_count)
                .ok_or_else(|| corrupt("graph node_id out of range", &paths.graph))?;
            if resident[slot] {
                return Err(corrupt("duplicate graph node_id", &paths.graph));
            }
            resident.set(slot, true);
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(slot as u32);

            let mut layers = Vec::with_capacity(node.layers.len());
            for neighbors in node.layers {
                let mut list = Vec::with_capacity(neighbors.len());
                for neighbor in neighbors {
                    let n = usize::try_from(neighbor)
                        .ok()
                        .filter(|&s| s < slot_count)
                        .ok_or_else(|| corrupt("neighbor id out of range", &paths.graph))?;
                    #[allow(clippy::cast_possible_truncation)]
                    list.push(NodeId(n as u32));
                }
                layers.push(list);
            }
            if reverse[slot].is_none() {
                deleted_ids.push(id);
            }
            records.push((id, GraphNode::from_layers(layers)));
        }

        // Every live id must be graph-resident: the buffer is flushed
        // before a checkpoint is written.
        for (slot, external) in reverse.iter().enumerate() {
            if external.is_some() && !resident[slot] {
                return Err(corrupt("live id missing from graph", &paths.graph));
            }
        }

        // A graph whose residents are all tombstoned has no entry point,
        // whatever the header says.
        let entry_point = if records.is_empty() || forward.is_empty() {
            None
        } else {
            let slot = usize::try_from(graph_file.entry_point)
                .ok()
                .filter(|&s| s < slot_count && resident[s])
                .ok_or_else(|| corrupt("entry point out of range", &paths.graph))?;
            if reverse[slot].is_none() {
                return Err(corrupt("entry point is tombstoned", &paths.graph));
            }
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(slot as u32);
            Some(id)
        };

        self.options.m = m;
        self.options.m_max0 = Some(m_max0);
        let params = GraphParams {
            m,
            m_max0,
            ef_construction: self.options.ef_construction,
        };

        self.dims = Some(dims);
        self.frozen = true;
        self.vectors = VectorStore::from_parts(dims, rows, tombstones);
        self.ids = IdMap { forward, reverse };
        self.metadata = MetadataStore::from_slots(metadata_slots);
        self.graph = ProximityGraph::from_parts(
            params,
            self.options.seed,
            slot_count,
            records,
            &deleted_ids,
            entry_point,
            top_layer,
        );
        self.buffer = WriteBuffer::new(self.options.buffer_capacity);

        // Quantized representations are not persisted; rebuild them from
        // the raw vectors.
        self.init_quant_stores(dims)?;
        if self.options.quantization != QuantizationMode::None {
            let live: Vec<NodeId> = self
                .graph
                .iter_nodes()
                .map(|(id, _)| id)
                .filter(|&id| !self.graph.is_deleted(id))
                .collect();
            for id in live {
                if let Some(sq8) = self.sq8.as_mut() {
                    sq8.set(id, self.vectors.get(id))?;
                }
                if let Some(bin) = self.binary.as_mut() {
                    bin.set(id, self.vectors.get(id))?;
                }
            }
        }
        Ok(())
    }

    fn replay_wal(&mut self, paths: &CheckpointPaths) -> Result<(), IndexError> {
        let records = wal::read_records(&paths.wal)?;
        if records.is_empty() {
            return Ok(());
        }
        log::info!(
            "replaying {} wal records from {}",
            records.len(),
            paths.wal.display()
        );
        for record in records {
            match record.op {
                OP_ADD => {
                    let Some((external_id, vector, metadata)) =
                        decode_write_payload(&record.payload)
                    else {
                        log::warn!("malformed add record, stopping replay");
                        break;
                    };
                    match self.add(external_id, &vector, Some(metadata)) {
                        Ok(()) => {}
                        Err(IndexError::DuplicateId(id)) => {
                            log::debug!("replay: id {id:?} already present");
                        }
                        Err(e) => return Err(e),
                    }
                }
                OP_UPSERT => {
                    let Some((external_id, vector, metadata)) =
                        decode_write_payload(&record.payload)
                    else {
                        log::warn!("malformed upsert record, stopping replay");
                        break;
                    };
                    self.upsert(external_id, &vector, Some(metadata))?;
                }
                OP_DELETE => {
                    let Some(external_id) = decode_delete_payload(&record.payload) else {
                        log::warn!("malformed delete record, stopping replay");
                        break;
                    };
                    self.delete(&external_id)?;
                }
                other => {
                    log::warn!("unknown wal op {other}, stopping replay");
                    break;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn validate_write(&self, external_id: &str, vector: &[f32]) -> Result<(), IndexError> {
        if external_id.is_empty() {
            return Err(IndexError::EmptyId);
        }
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        if let Some(reason) = invalid_component(vector) {
            return Err(IndexError::InvalidVector(reason));
        }
        if let Some(dims) = self.dims {
            if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    got: vector.len(),
                });
            }
        }
        Ok(())
    }

    fn init_dimension(&mut self, dims: usize) -> Result<(), IndexError> {
        if self.dims.is_some() {
            return Ok(());
        }
        self.dims = Some(dims);
        self.frozen = true;
        self.vectors = VectorStore::new(dims);
        self.init_quant_stores(dims)
    }

    fn init_quant_stores(&mut self, dims: usize) -> Result<(), IndexError> {
        match self.options.quantization {
            QuantizationMode::None => {
                self.sq8 = None;
                self.binary = None;
            }
            QuantizationMode::Scalar8 => {
                self.sq8 = Some(ScalarQuantStore::new(dims));
                self.binary = None;
            }
            QuantizationMode::Binary => {
                self.sq8 = None;
                self.binary = Some(BinaryQuantStore::new(dims));
            }
        }
        Ok(())
    }

    /// Moves buffered entries into the graph, oldest first.
    fn flush_buffer(&mut self) -> Result<(), IndexError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending: Vec<NodeId> = self.buffer.entries().iter().map(|e| e.node_id).collect();
        log::debug!("flushing {} buffered entries into the graph", pending.len());

        for (flushed, &id) in pending.iter().enumerate() {
            if let Err(e) = self.flush_one(id) {
                // Partial success: keep the failed and later entries staged.
                self.buffer.discard_flushed(flushed);
                return Err(e);
            }
        }
        self.buffer.discard_flushed(pending.len());
        Ok(())
    }

    fn flush_one(&mut self, id: NodeId) -> Result<(), IndexError> {
        if let Some(sq8) = self.sq8.as_mut() {
            sq8.set(id, self.vectors.get(id))?;
        }
        if let Some(bin) = self.binary.as_mut() {
            bin.set(id, self.vectors.get(id))?;
        }
        let view = PairView {
            kind: self.options.distance,
            vectors: &self.vectors,
            query: id,
        };
        self.graph.insert(id, &view)?;
        Ok(())
    }
}

fn invalid_component(vector: &[f32]) -> Option<String> {
    for (i, &x) in vector.iter().enumerate() {
        if x.is_nan() {
            return Some(format!("NaN at component {i}"));
        }
        if x.is_infinite() {
            return Some(format!("infinity at component {i}"));
        }
    }
    None
}

// =============================================================================
// Distance views
// =============================================================================

/// Construction view: query is the stored vector of the node being inserted.
struct PairView<'a> {
    kind: DistanceKind,
    vectors: &'a VectorStore,
    query: NodeId,
}

impl QueryDistance for PairView<'_> {
    fn to_query(&self, id: NodeId) -> f32 {
        self.kind
            .distance(self.vectors.get(self.query), self.vectors.get(id))
    }
}

impl DistanceView for PairView<'_> {
    fn between(&self, a: NodeId, b: NodeId) -> f32 {
        self.kind.distance(self.vectors.get(a), self.vectors.get(b))
    }
}

/// Query view over raw f32 vectors.
struct RawQueryView<'a> {
    kind: DistanceKind,
    query: &'a [f32],
    vectors: &'a VectorStore,
}

impl QueryDistance for RawQueryView<'_> {
    fn to_query(&self, id: NodeId) -> f32 {
        self.kind.distance(self.query, self.vectors.get(id))
    }
}

/// Query view dequantizing scalar-8 codes on the fly.
struct Sq8QueryView<'a> {
    kind: DistanceKind,
    query: &'a [f32],
    store: &'a ScalarQuantStore,
}

impl QueryDistance for Sq8QueryView<'_> {
    fn to_query(&self, id: NodeId) -> f32 {
        let (code, params) = self.store.get(id);
        match self.kind {
            DistanceKind::L2 => {
                quantized::l2_squared_sq8(self.query, code, params.scale, params.offset)
            }
            DistanceKind::Cosine => {
                quantized::cosine_sq8(self.query, code, params.scale, params.offset)
            }
            DistanceKind::InnerProduct => {
                quantized::inner_product_sq8(self.query, code, params.scale, params.offset)
            }
        }
    }
}

/// Query view ranking by Hamming distance over sign bits, rescored with the
/// stored norms.
struct BinaryQueryView<'a> {
    kind: DistanceKind,
    bits: Vec<u8>,
    norm: f32,
    store: &'a BinaryQuantStore,
    dims: usize,
}

impl QueryDistance for BinaryQueryView<'_> {
    fn to_query(&self, id: NodeId) -> f32 {
        let (bits, norm) = self.store.get(id);
        let h = hamming(&self.bits, bits);
        match self.kind {
            DistanceKind::L2 => quantized::l2_squared_binary(self.norm, norm, h, self.dims),
            DistanceKind::Cosine => quantized::cosine_binary(h, self.dims),
            DistanceKind::InnerProduct => {
                quantized::inner_product_binary(self.norm, norm, h, self.dims)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_add_and_get() {
        let mut index = VectorIndex::new();
        index
            .add("a", &[1.0, 2.0], Some(md(&[("kind", "doc")])))
            .unwrap();

        let (vector, metadata) = index.get("a").unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(metadata.get("kind").unwrap(), "doc");
        assert_eq!(index.count(), 1);
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut index = VectorIndex::new();
        index.add("v", &[1.0, 2.0], None).unwrap();
        let err = index.add("v", &[3.0, 4.0], None).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateId(id) if id == "v"));
        // State unchanged.
        assert_eq!(index.get("v").unwrap().0, vec![1.0, 2.0]);
    }

    #[test]
    fn test_validation_errors() {
        let mut index = VectorIndex::new();
        assert!(matches!(
            index.add("", &[1.0], None),
            Err(IndexError::EmptyId)
        ));
        assert!(matches!(
            index.add("x", &[], None),
            Err(IndexError::EmptyVector)
        ));
        assert!(matches!(
            index.add("x", &[f32::NAN], None),
            Err(IndexError::InvalidVector(_))
        ));

        index.add("first", &[0.0; 16], None).unwrap();
        let err = index.add("x", &[1.0, 2.0], None).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 16,
                got: 2
            }
        ));
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut index = VectorIndex::new();
        assert!(index.upsert("v", &[1.0, 2.0], None).unwrap());
        assert!(!index.upsert("v", &[3.0, 4.0], None).unwrap());
        assert_eq!(index.get("v").unwrap().0, vec![3.0, 4.0]);
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_delete_tombstones() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0, 0.0], None).unwrap();
        index.add("b", &[0.0, 1.0], None).unwrap();

        assert!(index.delete("a").unwrap());
        assert!(!index.delete("a").unwrap());
        assert_eq!(index.count(), 1);
        assert!(index.get("a").is_none());

        let hits = index.search(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_search_merges_buffer_and_graph() {
        let mut index = VectorIndex::with_options(IndexOptions {
            buffer_capacity: 4,
            ..IndexOptions::default()
        })
        .unwrap();

        // 8 inserts with capacity 4: the first half flushes into the graph,
        // the rest stays buffered.
        for i in 0..8 {
            index
                .add(format!("v{i}"), &[i as f32, 0.0], None)
                .unwrap();
        }
        assert!(index.stats().graph_nodes > 0);
        assert!(index.stats().buffer_len > 0);

        let hits = index.search(&[3.1, 0.0], 8, None).unwrap();
        assert_eq!(hits.len(), 8);
        assert_eq!(hits[0].id, "v3");
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_search_applies_filter_post_search() {
        let mut index = VectorIndex::new();
        index
            .add("a", &[0.0, 0.0], Some(md(&[("lang", "en")])))
            .unwrap();
        index
            .add("b", &[0.1, 0.0], Some(md(&[("lang", "de")])))
            .unwrap();
        index
            .add("c", &[0.2, 0.0], Some(md(&[("lang", "en")])))
            .unwrap();

        let filter = Filter::new().with("lang", "en");
        let hits = index.search(&[0.0, 0.0], 3, Some(&filter)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_clear_resets_dimension() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0, 2.0, 3.0], None).unwrap();
        index.clear().unwrap();

        assert_eq!(index.count(), 0);
        assert_eq!(index.dimension(), None);
        assert!(index.search(&[1.0, 2.0, 3.0], 5, None).unwrap().is_empty());
        // A different dimension is accepted after clear.
        index.add("b", &[1.0], None).unwrap();
        assert_eq!(index.dimension(), Some(1));
    }

    #[test]
    fn test_configure_frozen_after_first_insert() {
        let mut index = VectorIndex::new();
        index.add("a", &[1.0], None).unwrap();

        let err = index
            .configure(IndexOptions {
                m: 8,
                ..index.options().clone()
            })
            .unwrap_err();
        assert!(matches!(err, IndexError::ConfigurationFrozen("m")));

        // ef_search stays mutable.
        index
            .configure(IndexOptions {
                ef_search: 200,
                ..index.options().clone()
            })
            .unwrap();
        assert_eq!(index.options().ef_search, 200);
    }

    #[test]
    fn test_add_batch_validates_everything_first() {
        let mut index = VectorIndex::new();
        let err = index
            .add_batch(vec![
                ("a".into(), vec![1.0, 2.0], None),
                ("b".into(), vec![1.0], None),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.count(), 0, "validation failure leaves state unchanged");

        let inserted = index
            .add_batch(vec![
                ("a".into(), vec![1.0, 2.0], None),
                ("b".into(), vec![3.0, 4.0], None),
                ("a".into(), vec![5.0, 6.0], None),
            ])
            .unwrap();
        assert_eq!(inserted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn test_checkpoint_without_path_fails() {
        let mut index = VectorIndex::new();
        assert!(matches!(
            index.checkpoint(),
            Err(IndexError::PersistenceDisabled)
        ));
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut index = VectorIndex::new();
        for i in 0..5 {
            index.add(format!("v{i}"), &[i as f32], None).unwrap();
        }
        index.flush().unwrap();
        let graph_nodes = index.stats().graph_nodes;
        index.flush().unwrap();
        assert_eq!(index.stats().graph_nodes, graph_nodes);
        assert_eq!(index.stats().buffer_len, 0);
    }

    #[test]
    fn test_scalar8_search_close_to_exact() {
        let mut index = VectorIndex::with_options(IndexOptions {
            quantization: QuantizationMode::Scalar8,
            ..IndexOptions::default()
        })
        .unwrap();

        for i in 0..30 {
            index
                .add(format!("v{i}"), &[i as f32 / 10.0, 1.0 - i as f32 / 30.0], None)
                .unwrap();
        }
        index.flush().unwrap();

        let hits = index.search(&[0.95, 0.7], 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        // The nearest raw vector is v9 or v10; quantized ranking keeps one
        // of them on top.
        assert!(hits[0].id == "v9" || hits[0].id == "v10", "got {}", hits[0].id);
    }

    #[test]
    fn test_binary_search_ranks_by_sign_agreement() {
        let mut index = VectorIndex::with_options(IndexOptions {
            quantization: QuantizationMode::Binary,
            ..IndexOptions::default()
        })
        .unwrap();

        index.add("pos", &[1.0; 16], None).unwrap();
        index.add("neg", &[-1.0; 16], None).unwrap();
        index.add("mixed", &{
            let mut v = [1.0f32; 16];
            for x in v.iter_mut().skip(8) {
                *x = -1.0;
            }
            v
        }, None).unwrap();
        index.flush().unwrap();

        let hits = index.search(&[1.0; 16], 3, None).unwrap();
        assert_eq!(hits[0].id, "pos");
        assert_eq!(hits[2].id, "neg");
    }

    #[test]
    fn test_memory_accounting_grows() {
        let mut index = VectorIndex::new();
        let before = index.stats().memory.total();
        for i in 0..50 {
            index.add(format!("v{i}"), &[i as f32; 8], None).unwrap();
        }
        index.flush().unwrap();
        let after = index.stats();
        assert!(after.memory.vectors > 0);
        assert!(after.memory.graph > 0);
        assert!(after.memory.id_map > 0);
        assert!(after.memory.total() > before);
    }
}
