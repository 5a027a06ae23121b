//! Checkpoint file formats.
//!
//! Three files, all little-endian, versions starting at 1. Readers refuse
//! unknown magic bytes and higher versions.
//!
//! `<base>.vectors` — magic "OMVC", version u16, dimension u32, count u64,
//! then `count` raw f32 records of length `dimension`. Every slot is
//! written, tombstoned ones included, so ids stay dense; a slot with no
//! meta record is a tombstone.
//!
//! `<base>.graph` — magic "OMGR", version u16, M u16, Mmax0 u16,
//! top_layer u16, entry_point u64, node_count u64, then per resident node:
//! node_id u64, top_layer u16, and for each layer 0..=top_layer a
//! neighbor list as n_neighbors u16 followed by n_neighbors u64 ids.
//!
//! `<base>.meta` — magic "OMMD", version u16, count u64, then per live
//! node: node_id u64, external_id_len u32 + bytes, entry_count u32, and
//! per entry key_len u32 + bytes, val_len u32 + bytes. Strings are UTF-8,
//! not null-terminated.

use std::path::Path;

use super::{read_file, write_atomic, PersistenceError};

/// Magic bytes of the vectors file.
pub const VECTORS_MAGIC: [u8; 4] = *b"OMVC";
/// Magic bytes of the graph file.
pub const GRAPH_MAGIC: [u8; 4] = *b"OMGR";
/// Magic bytes of the metadata file.
pub const META_MAGIC: [u8; 4] = *b"OMMD";
/// Current format version of all three files.
pub const FORMAT_VERSION: u16 = 1;

/// Decoded contents of a graph file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphFile {
    /// Max neighbors per node at layers > 0.
    pub m: u16,
    /// Max neighbors per node at layer 0.
    pub m_max0: u16,
    /// The graph's running top layer.
    pub top_layer: u16,
    /// Entry point id; meaningful only when `nodes` is non-empty.
    pub entry_point: u64,
    /// One record per resident node, in file order.
    pub nodes: Vec<GraphNodeRecord>,
}

/// One node record of a graph file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNodeRecord {
    /// The node's id.
    pub node_id: u64,
    /// Neighbor lists for layers `0..=top_layer`, in layer order.
    pub layers: Vec<Vec<u64>>,
}

/// One record of a metadata file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    /// The node's id.
    pub node_id: u64,
    /// The caller-chosen external id.
    pub external_id: String,
    /// Key-value metadata pairs.
    pub entries: Vec<(String, String)>,
}

// =============================================================================
// Vectors file
// =============================================================================

/// Writes the vectors file: every slot, tombstoned included.
///
/// # Errors
///
/// Returns `PersistenceError::Io` if the write fails.
///
/// # Panics
///
/// Panics if `rows.len()` is not a multiple of `dims` (coordinator
/// invariant).
pub fn write_vectors(path: &Path, dims: u32, rows: &[f32]) -> Result<(), PersistenceError> {
    assert!(dims > 0 && rows.len() % dims as usize == 0);
    let count = (rows.len() / dims as usize) as u64;

    let mut buf = Vec::with_capacity(18 + rows.len() * 4);
    buf.extend_from_slice(&VECTORS_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&dims.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(bytemuck::cast_slice(rows));

    write_atomic(path, &buf)
}

/// Reads the vectors file back as `(dims, rows)`.
///
/// # Errors
///
/// Returns `PersistenceError::Io` on read failure, `Corrupt` on bad magic,
/// higher version, or truncated records.
pub fn read_vectors(path: &Path) -> Result<(u32, Vec<f32>), PersistenceError> {
    let bytes = read_file(path)?;
    let mut dec = Decoder::new(&bytes, path);

    dec.expect_magic(&VECTORS_MAGIC)?;
    dec.expect_version()?;
    let dims = dec.take_u32()?;
    let count = dec.take_u64()?;
    if dims == 0 {
        return Err(dec.corrupt("zero dimension"));
    }

    let total = (count as usize)
        .checked_mul(dims as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| dec.corrupt("vector count overflows"))?;
    let payload = dec.take_bytes(total)?;
    dec.expect_end()?;

    // Vec<u8> carries no alignment guarantee for f32; fall back to a
    // per-element copy when the cast fails.
    let rows = match bytemuck::try_cast_slice::<u8, f32>(payload) {
        Ok(floats) => floats.to_vec(),
        Err(_) => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("chunks_exact yields 4 bytes")))
            .collect(),
    };
    Ok((dims, rows))
}

// =============================================================================
// Graph file
// =============================================================================

/// Writes the graph file.
///
/// # Errors
///
/// Returns `PersistenceError::Io` if the write fails.
pub fn write_graph(path: &Path, graph: &GraphFile) -> Result<(), PersistenceError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&GRAPH_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&graph.m.to_le_bytes());
    buf.extend_from_slice(&graph.m_max0.to_le_bytes());
    buf.extend_from_slice(&graph.top_layer.to_le_bytes());
    buf.extend_from_slice(&graph.entry_point.to_le_bytes());
    buf.extend_from_slice(&(graph.nodes.len() as u64).to_le_bytes());

    for node in &graph.nodes {
        buf.extend_from_slice(&node.node_id.to_le_bytes());
        let top = (node.layers.len() - 1) as u16;
        buf.extend_from_slice(&top.to_le_bytes());
        for layer in &node.layers {
            let n = u16::try_from(layer.len()).expect("neighbor list bounded by m_max0");
            buf.extend_from_slice(&n.to_le_bytes());
            for &neighbor in layer {
                buf.extend_from_slice(&neighbor.to_le_bytes());
            }
        }
    }

    write_atomic(path, &buf)
}

/// Reads the graph file.
///
/// # Errors
///
/// Returns `PersistenceError::Io` on read failure, `Corrupt` on bad magic,
/// higher version, or truncated records.
pub fn read_graph(path: &Path) -> Result<GraphFile, PersistenceError> {
    let bytes = read_file(path)?;
    let mut dec = Decoder::new(&bytes, path);

    dec.expect_magic(&GRAPH_MAGIC)?;
    dec.expect_version()?;
    let m = dec.take_u16()?;
    let m_max0 = dec.take_u16()?;
    let top_layer = dec.take_u16()?;
    let entry_point = dec.take_u64()?;
    let node_count = dec.take_u64()?;

    let mut nodes = Vec::new();
    nodes
        .try_reserve(usize::try_from(node_count).map_err(|_| dec.corrupt("node count overflows"))?)
        .map_err(|_| dec.corrupt("node count exceeds memory"))?;

    for _ in 0..node_count {
        let node_id = dec.take_u64()?;
        let node_top = dec.take_u16()?;
        let mut layers = Vec::with_capacity(usize::from(node_top) + 1);
        for _ in 0..=node_top {
            let n = dec.take_u16()?;
            let mut neighbors = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                neighbors.push(dec.take_u64()?);
            }
            layers.push(neighbors);
        }
        nodes.push(GraphNodeRecord { node_id, layers });
    }
    dec.expect_end()?;

    Ok(GraphFile {
        m,
        m_max0,
        top_layer,
        entry_point,
        nodes,
    })
}

// =============================================================================
// Metadata file
// =============================================================================

/// Writes the metadata file: one record per live node.
///
/// # Errors
///
/// Returns `PersistenceError::Io` if the write fails.
pub fn write_meta(path: &Path, records: &[MetaRecord]) -> Result<(), PersistenceError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&META_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(records.len() as u64).to_le_bytes());

    for record in records {
        buf.extend_from_slice(&record.node_id.to_le_bytes());
        write_string(&mut buf, &record.external_id);
        buf.extend_from_slice(&(record.entries.len() as u32).to_le_bytes());
        for (key, value) in &record.entries {
            write_string(&mut buf, key);
            write_string(&mut buf, value);
        }
    }

    write_atomic(path, &buf)
}

/// Reads the metadata file.
///
/// # Errors
///
/// Returns `PersistenceError::Io` on read failure, `Corrupt` on bad magic,
/// higher version, truncated records, or non-UTF-8 strings.
pub fn read_meta(path: &Path) -> Result<Vec<MetaRecord>, PersistenceError> {
    let bytes = read_file(path)?;
    let mut dec = Decoder::new(&bytes, path);

    dec.expect_magic(&META_MAGIC)?;
    dec.expect_version()?;
    let count = dec.take_u64()?;

    let mut records = Vec::new();
    records
        .try_reserve(usize::try_from(count).map_err(|_| dec.corrupt("record count overflows"))?)
        .map_err(|_| dec.corrupt("record count exceeds memory"))?;

    for _ in 0..count {
        let node_id = dec.take_u64()?;
        let external_id = dec.take_string()?;
        let entry_count = dec.take_u32()?;
        // Capacity grows with decoded data; a hostile count alone cannot
        // force an allocation.
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let key = dec.take_string()?;
            let value = dec.take_string()?;
            entries.push((key, value));
        }
        records.push(MetaRecord {
            node_id,
            external_id,
            entries,
        });
    }
    dec.expect_end()?;

    Ok(records)
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

// =============================================================================
// Little-endian decoding
// =============================================================================

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8], path: &'a Path) -> Self {
        Self {
            bytes,
            pos: 0,
            path,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> PersistenceError {
        PersistenceError::Corrupt {
            reason: reason.into(),
            file: Some(self.path.to_path_buf()),
        }
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], PersistenceError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.corrupt("unexpected end of file"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn expect_magic(&mut self, magic: &[u8; 4]) -> Result<(), PersistenceError> {
        let found = self.take_bytes(4)?;
        if found != magic {
            return Err(self.corrupt(format!("bad magic {found:02x?}")));
        }
        Ok(())
    }

    fn expect_version(&mut self) -> Result<(), PersistenceError> {
        let version = self.take_u16()?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(self.corrupt(format!("unsupported version {version}")));
        }
        Ok(())
    }

    fn expect_end(&self) -> Result<(), PersistenceError> {
        if self.pos != self.bytes.len() {
            return Err(self.corrupt(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }

    fn take_u16(&mut self) -> Result<u16, PersistenceError> {
        let b = self.take_bytes(2)?;
        Ok(u16::from_le_bytes(b.try_into().expect("2 bytes")))
    }

    fn take_u32(&mut self) -> Result<u32, PersistenceError> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().expect("4 bytes")))
    }

    fn take_u64(&mut self) -> Result<u64, PersistenceError> {
        let b = self.take_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    fn take_string(&mut self) -> Result<String, PersistenceError> {
        let len = self.take_u32()? as usize;
        let bytes = self.take_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.corrupt("invalid utf-8 string"))
    }
}
