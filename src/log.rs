//! Append-only logs of fixed-size binary records addressed by integer index.
//!
//! A record's size is fixed when it is created. Reads and writes address a byte range inside
//! one record and are bounds-checked against it. Callers serialize access to a single record;
//! the log only guarantees that concurrent access to *different* records cannot interfere and
//! that a completed write is visible to every later read.

use crate::error::{Result, TierError};

use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

const INDEX_MAGIC: &[u8; 8] = b"TIERIDX1";
const INDEX_VERSION: u32 = 1;
const INDEX_HEADER_LEN: u64 = 8 + 4;
/// offset u64 + len u64 + crc32 of the preceding 16 bytes.
const INDEX_ENTRY_LEN: u64 = 8 + 8 + 4;

/// Storage contract shared by every tier backend.
pub trait IndexedLog: std::fmt::Debug + Send + Sync {
    /// Appends a zero-filled record of `size_bytes` and returns its index.
    fn create(&self, size_bytes: usize) -> Result<u64>;

    /// Reads `len` bytes starting at `offset` within record `index`.
    fn read(&self, index: u64, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Overwrites bytes starting at `offset` within record `index`.
    fn write(&self, index: u64, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Number of records.
    fn size(&self) -> u64;

    /// Reserved size of record `index`.
    fn record_size(&self, index: u64) -> Result<usize>;

    /// Bytes occupied by record data.
    fn data_size_bytes(&self) -> u64;

    /// Makes completed writes durable. Memory-backed logs have nothing to do.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn check_bounds(index: u64, offset: usize, len: usize, record_size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= record_size => Ok(()),
        _ => Err(TierError::OutOfRange {
            index,
            offset,
            len,
            record_size,
        }),
    }
}

fn unknown_index(index: u64, offset: usize, len: usize) -> TierError {
    TierError::OutOfRange {
        index,
        offset,
        len,
        record_size: 0,
    }
}

/// Log held entirely in memory. Each record has its own lock.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: RwLock<Vec<RwLock<Vec<u8>>>>,
    data_bytes: AtomicU64,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexedLog for MemoryLog {
    fn create(&self, size_bytes: usize) -> Result<u64> {
        let mut records = self.records.write()?;
        records.push(RwLock::new(vec![0u8; size_bytes]));
        self.data_bytes
            .fetch_add(size_bytes as u64, Ordering::Relaxed);
        Ok(records.len() as u64 - 1)
    }

    fn read(&self, index: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        let records = self.records.read()?;
        let record = records
            .get(index as usize)
            .ok_or_else(|| unknown_index(index, offset, len))?
            .read()?;
        check_bounds(index, offset, len, record.len())?;
        Ok(record[offset..offset + len].to_vec())
    }

    fn write(&self, index: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let records = self.records.read()?;
        let mut record = records
            .get(index as usize)
            .ok_or_else(|| unknown_index(index, offset, bytes.len()))?
            .write()?;
        check_bounds(index, offset, bytes.len(), record.len())?;
        record[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.records.read().map(|r| r.len() as u64).unwrap_or(0)
    }

    fn record_size(&self, index: u64) -> Result<usize> {
        let records = self.records.read()?;
        let record = records
            .get(index as usize)
            .ok_or_else(|| unknown_index(index, 0, 0))?
            .read()?;
        Ok(record.len())
    }

    fn data_size_bytes(&self) -> u64 {
        self.data_bytes.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    offset: u64,
    len: u64,
}

impl IndexEntry {
    fn encode(&self) -> [u8; INDEX_ENTRY_LEN as usize] {
        let mut buf = [0u8; INDEX_ENTRY_LEN as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.len.to_le_bytes());
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..16]);
        buf[16..20].copy_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let mut hasher = Crc32::new();
        hasher.update(&buf[0..16]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[16..20]);
        if hasher.finalize() != u32::from_le_bytes(crc) {
            return None;
        }
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&buf[0..8]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&buf[8..16]);
        Some(Self {
            offset: u64::from_le_bytes(offset),
            len: u64::from_le_bytes(len),
        })
    }
}

/// File-backed log: `<name>.data` holds the records back to back, `<name>.index` holds one
/// checksummed `(offset, len)` entry per record after a magic + version header.
#[derive(Debug)]
pub struct FileLog {
    data_path: PathBuf,
    index_path: PathBuf,
    entries: RwLock<Vec<IndexEntry>>,
    /// Accessed with positional I/O only, so records never contend on a shared cursor.
    data: File,
    index: Mutex<File>,
}

impl FileLog {
    /// Opens (or creates) the log files for `name` inside `dir`, restoring all records.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let data_path = dir.join(format!("{}.data", name));
        let index_path = dir.join(format!("{}.index", name));

        let data = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&data_path)?;
        let mut index = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&index_path)?;

        let entries = if index.metadata()?.len() == 0 {
            index.write_all(INDEX_MAGIC)?;
            index.write_all(&INDEX_VERSION.to_le_bytes())?;
            index.sync_data()?;
            Vec::new()
        } else {
            load_index(&index_path)?
        };

        let data_len = data.metadata()?.len();
        if let Some(e) = entries.iter().find(|e| e.offset + e.len > data_len) {
            return Err(TierError::Corruption {
                details: format!(
                    "index entry [{}, +{}) extends past data file length {}",
                    e.offset, e.len, data_len
                ),
                path: Some(data_path.display().to_string()),
            });
        }

        Ok(Self {
            data_path,
            index_path,
            entries: RwLock::new(entries),
            data,
            index: Mutex::new(index),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Size of the index file on disk.
    pub fn index_size_bytes(&self) -> u64 {
        fs::metadata(&self.index_path).map(|m| m.len()).unwrap_or(0)
    }

    fn entry(&self, index: u64, offset: usize, len: usize) -> Result<IndexEntry> {
        let entries = self.entries.read()?;
        let entry = entries
            .get(index as usize)
            .copied()
            .ok_or_else(|| unknown_index(index, offset, len))?;
        check_bounds(index, offset, len, entry.len as usize)?;
        Ok(entry)
    }
}

fn load_index(path: &Path) -> Result<Vec<IndexEntry>> {
    let corruption = |details: String| TierError::Corruption {
        details,
        path: Some(path.display().to_string()),
    };

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() < INDEX_HEADER_LEN as usize || &bytes[0..8] != INDEX_MAGIC {
        return Err(corruption("missing index magic".to_string()));
    }
    let mut ver = [0u8; 4];
    ver.copy_from_slice(&bytes[8..12]);
    let version = u32::from_le_bytes(ver);
    if version != INDEX_VERSION {
        return Err(corruption(format!("unsupported index version {}", version)));
    }

    let body = &bytes[INDEX_HEADER_LEN as usize..];
    if body.len() as u64 % INDEX_ENTRY_LEN != 0 {
        return Err(corruption(format!(
            "torn index entry: {} trailing bytes",
            body.len() as u64 % INDEX_ENTRY_LEN
        )));
    }

    let mut entries = Vec::with_capacity(body.len() / INDEX_ENTRY_LEN as usize);
    let mut expected_offset = 0u64;
    for (i, chunk) in body.chunks_exact(INDEX_ENTRY_LEN as usize).enumerate() {
        let entry = IndexEntry::decode(chunk)
            .ok_or_else(|| corruption(format!("index entry {} CRC mismatch", i)))?;
        if entry.offset != expected_offset {
            return Err(corruption(format!(
                "index entry {} at offset {} but expected {}",
                i, entry.offset, expected_offset
            )));
        }
        expected_offset += entry.len;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, pos)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, pos)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, pos)? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => {
                let rest = buf;
                buf = &mut rest[n..];
                pos += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, pos)? {
            0 => return Err(io::ErrorKind::WriteZero.into()),
            n => {
                buf = &buf[n..];
                pos += n as u64;
            }
        }
    }
    Ok(())
}

impl IndexedLog for FileLog {
    fn create(&self, size_bytes: usize) -> Result<u64> {
        let mut entries = self.entries.write()?;
        let offset = entries.last().map(|e| e.offset + e.len).unwrap_or(0);
        let entry = IndexEntry {
            offset,
            len: size_bytes as u64,
        };

        // Data first: a crash between the two writes leaves unindexed trailing bytes, which
        // the next create overwrites.
        write_all_at(&self.data, &vec![0u8; size_bytes], offset)?;
        self.index.lock()?.write_all(&entry.encode())?;

        entries.push(entry);
        Ok(entries.len() as u64 - 1)
    }

    fn read(&self, index: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        let entry = self.entry(index, offset, len)?;
        let mut buf = vec![0u8; len];
        read_exact_at(&self.data, &mut buf, entry.offset + offset as u64).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                TierError::Corruption {
                    details: format!("record {} shorter than its index entry", index),
                    path: Some(self.data_path.display().to_string()),
                }
            } else {
                TierError::Io(e)
            }
        })?;
        Ok(buf)
    }

    fn write(&self, index: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let entry = self.entry(index, offset, bytes.len())?;
        write_all_at(&self.data, bytes, entry.offset + offset as u64)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.entries.read().map(|e| e.len() as u64).unwrap_or(0)
    }

    fn record_size(&self, index: u64) -> Result<usize> {
        Ok(self.entry(index, 0, 0)?.len as usize)
    }

    fn data_size_bytes(&self) -> u64 {
        self.entries
            .read()
            .map(|e| e.last().map(|l| l.offset + l.len).unwrap_or(0))
            .unwrap_or(0)
    }

    fn sync(&self) -> Result<()> {
        self.data.sync_data()?;
        self.index.lock()?.sync_data()?;
        Ok(())
    }
}
