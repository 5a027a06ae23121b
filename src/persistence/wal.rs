//! Write-ahead log.
//!
//! When `use_wal` is on, every add, upsert and delete appends one record
//! before the caller is acknowledged; a checkpoint truncates the log, and
//! recovery replays whatever follows the last checkpoint.
//!
//! Record layout (little-endian): op code u8, timestamp u64 (milliseconds
//! since the Unix epoch), payload_len u32, then the payload. Payloads reuse
//! the string encoding of the metadata file: length-prefixed UTF-8.
//!
//! A torn trailing record (a crash mid-append) is dropped: replay keeps the
//! valid prefix and logs a warning.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::metadata::Metadata;

use super::WalError;

/// Op code of an add record.
pub const OP_ADD: u8 = 1;
/// Op code of a delete record.
pub const OP_DELETE: u8 = 2;
/// Op code of an upsert record.
pub const OP_UPSERT: u8 = 3;

/// Record header size: op u8 + timestamp u64 + payload_len u32.
const HEADER_SIZE: usize = 13;

/// A decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// One of [`OP_ADD`], [`OP_DELETE`], [`OP_UPSERT`].
    pub op: u8,
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp: u64,
    /// Op-specific payload.
    pub payload: Vec<u8>,
}

/// Appends records to the write-ahead log.
#[derive(Debug)]
pub struct WalWriter {
    file: File,
    path: PathBuf,
}

impl WalWriter {
    /// Opens (or creates) the log at `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| WalError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Appends one record and syncs it to disk before returning, so the
    /// caller is only acknowledged once the record is durable.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the write or sync fails.
    pub fn append(&mut self, op: u8, payload: &[u8]) -> Result<(), WalError> {
        let timestamp = unix_millis();
        let payload_len = u32::try_from(payload.len()).expect("payload bounded by vector size");

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.push(op);
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(payload);

        self.io(|file| {
            file.write_all(&buf)?;
            file.sync_data()
        })
    }

    /// Empties the log. Called after a successful checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the truncation fails.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.io(|file| {
            file.set_len(0)?;
            file.sync_data()
        })
    }

    fn io(&mut self, f: impl FnOnce(&mut File) -> std::io::Result<()>) -> Result<(), WalError> {
        f(&mut self.file).map_err(|source| WalError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Reads every valid record from the log.
///
/// An absent file yields no records. A torn trailing record stops the read
/// at the valid prefix with a warning.
///
/// # Errors
///
/// Returns `WalError::Io` if the file exists but cannot be read.
pub fn read_records(path: &Path) -> Result<Vec<WalRecord>, WalError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(WalError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|source| WalError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + HEADER_SIZE > bytes.len() {
            log::warn!(
                "wal {}: torn record header at offset {pos}, keeping {} records",
                path.display(),
                records.len()
            );
            break;
        }
        let op = bytes[pos];
        let timestamp = u64::from_le_bytes(bytes[pos + 1..pos + 9].try_into().expect("8 bytes"));
        let payload_len =
            u32::from_le_bytes(bytes[pos + 9..pos + 13].try_into().expect("4 bytes")) as usize;
        let payload_start = pos + HEADER_SIZE;
        let Some(payload_end) = payload_start.checked_add(payload_len) else {
            log::warn!("wal {}: absurd payload length at offset {pos}", path.display());
            break;
        };
        if payload_end > bytes.len() {
            log::warn!(
                "wal {}: torn payload at offset {pos}, keeping {} records",
                path.display(),
                records.len()
            );
            break;
        }
        records.push(WalRecord {
            op,
            timestamp,
            payload: bytes[payload_start..payload_end].to_vec(),
        });
        pos = payload_end;
    }
    Ok(records)
}

// =============================================================================
// Payload encoding
// =============================================================================

/// Encodes an add/upsert payload: id, vector, metadata.
#[must_use]
pub fn encode_write_payload(external_id: &str, vector: &[f32], metadata: &Metadata) -> Vec<u8> {
    let mut buf = Vec::new();
    put_string(&mut buf, external_id);
    buf.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for &x in vector {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort();
    for (key, value) in entries {
        put_string(&mut buf, key);
        put_string(&mut buf, value);
    }
    buf
}

/// Decodes an add/upsert payload. `None` means the record is malformed;
/// replay treats it like a torn tail.
#[must_use]
pub fn decode_write_payload(payload: &[u8]) -> Option<(String, Vec<f32>, Metadata)> {
    let mut pos = 0;
    let external_id = get_string(payload, &mut pos)?;
    let dims = get_u32(payload, &mut pos)? as usize;
    let mut vector = Vec::with_capacity(dims);
    for _ in 0..dims {
        let bytes: [u8; 4] = payload.get(pos..pos + 4)?.try_into().ok()?;
        vector.push(f32::from_le_bytes(bytes));
        pos += 4;
    }
    let entry_count = get_u32(payload, &mut pos)?;
    let mut metadata = Metadata::new();
    for _ in 0..entry_count {
        let key = get_string(payload, &mut pos)?;
        let value = get_string(payload, &mut pos)?;
        metadata.insert(key, value);
    }
    (pos == payload.len()).then_some((external_id, vector, metadata))
}

/// Encodes a delete payload: just the external id.
#[must_use]
pub fn encode_delete_payload(external_id: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    put_string(&mut buf, external_id);
    buf
}

/// Decodes a delete payload.
#[must_use]
pub fn decode_delete_payload(payload: &[u8]) -> Option<String> {
    let mut pos = 0;
    let external_id = get_string(payload, &mut pos)?;
    (pos == payload.len()).then_some(external_id)
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn get_u32(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let slice: [u8; 4] = bytes.get(*pos..*pos + 4)?.try_into().ok()?;
    *pos += 4;
    Some(u32::from_le_bytes(slice))
}

fn get_string(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let len = get_u32(bytes, pos)? as usize;
    let slice = bytes.get(*pos..*pos + len)?;
    *pos += len;
    String::from_utf8(slice.to_vec()).ok()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ix.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(OP_ADD, b"alpha").unwrap();
        writer.append(OP_DELETE, b"beta").unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].op, OP_ADD);
        assert_eq!(records[0].payload, b"alpha");
        assert_eq!(records[1].op, OP_DELETE);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(&dir.path().join("absent.wal")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_torn_tail_keeps_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ix.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(OP_ADD, b"complete").unwrap();
        writer.append(OP_ADD, b"will-be-torn").unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"complete");
    }

    #[test]
    fn test_truncate_empties_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ix.wal");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(OP_ADD, b"x").unwrap();
        writer.truncate().unwrap();
        assert!(read_records(&path).unwrap().is_empty());
    }

    #[test]
    fn test_write_payload_roundtrip() {
        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), "en".into());
        metadata.insert("kind".into(), "doc".into());

        let payload = encode_write_payload("doc-1", &[1.5, -2.5, 0.0], &metadata);
        let (id, vector, decoded) = decode_write_payload(&payload).unwrap();
        assert_eq!(id, "doc-1");
        assert_eq!(vector, vec![1.5, -2.5, 0.0]);
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_delete_payload_roundtrip() {
        let payload = encode_delete_payload("doc-9");
        assert_eq!(decode_delete_payload(&payload).unwrap(), "doc-9");
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(decode_write_payload(b"\x05\x00\x00\x00ab").is_none());
        assert!(decode_delete_payload(&[]).is_none());
    }
}
