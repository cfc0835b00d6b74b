//! Byte-exact persistence of the queue header and message slots.
//!
//! Layout (little-endian, packed):
//!
//! ```text
//! offset 0   capacity  i32
//! offset 4   head      i32
//! offset 8   tail      i32
//! offset 12  count     i32
//! offset 16  slot[0]   slot_size bytes
//! ...
//! ```
//!
//! Nothing here is synchronized. Callers hold the queue lock around every
//! header/slot pair.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::{QueueError, Result};

pub const HEADER_SIZE: usize = 16;
pub const DEFAULT_SLOT_SIZE: usize = 20;
/// Room for the largest length-prefixed payload plus its length field.
pub const MAX_SLOT_SIZE: usize = u16::MAX as usize + 2;

// Slots zeroed per write while initializing a new file.
const INIT_CHUNK_SLOTS: usize = 256;

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueHeader {
    pub capacity: u32,
    pub head: u32,
    pub tail: u32,
    pub count: u32,
}

impl QueueHeader {
    pub fn new(capacity: u32) -> QueueHeader {
        QueueHeader {
            capacity,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Header after committing one message into slot `tail`.
    pub fn pushed(self) -> QueueHeader {
        debug_assert!(!self.is_full());
        QueueHeader {
            tail: (self.tail + 1) % self.capacity,
            count: self.count + 1,
            ..self
        }
    }

    /// Header after taking one message out of slot `head`.
    pub fn popped(self) -> QueueHeader {
        debug_assert!(!self.is_empty());
        QueueHeader {
            head: (self.head + 1) % self.capacity,
            count: self.count - 1,
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(QueueError::CorruptHeader("capacity is zero".to_string()));
        }
        if self.head >= self.capacity || self.tail >= self.capacity {
            return Err(QueueError::CorruptHeader(format!(
                "head {} / tail {} outside capacity {}",
                self.head, self.tail, self.capacity
            )));
        }
        if self.count > self.capacity {
            return Err(QueueError::CorruptHeader(format!(
                "count {} exceeds capacity {}",
                self.count, self.capacity
            )));
        }
        let expected_tail = (self.head as u64 + self.count as u64) % self.capacity as u64;
        if self.tail as u64 != expected_tail {
            return Err(QueueError::CorruptHeader(format!(
                "tail {} does not match head {} + count {}",
                self.tail, self.head, self.count
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let fields = [self.capacity, self.head, self.tail, self.count];
        for (chunk, value) in buf.chunks_exact_mut(4).zip(fields.iter()) {
            chunk.copy_from_slice(&(*value as i32).to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<QueueHeader> {
        let mut fields = [0u32; 4];
        for (i, chunk) in buf.chunks_exact(4).enumerate() {
            let raw = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if raw < 0 {
                return Err(QueueError::CorruptHeader(format!(
                    "negative field {} at offset {}",
                    raw,
                    i * 4
                )));
            }
            fields[i] = raw as u32;
        }
        let header = QueueHeader {
            capacity: fields[0],
            head: fields[1],
            tail: fields[2],
            count: fields[3],
        };
        header.validate()?;
        Ok(header)
    }
}

pub(crate) fn check_slot_size(slot_size: usize) -> Result<()> {
    if slot_size == 0 || slot_size > MAX_SLOT_SIZE {
        return Err(QueueError::config(format!(
            "slot size {} outside 1..={}",
            slot_size, MAX_SLOT_SIZE
        )));
    }
    Ok(())
}

/// Total file size for a queue of `capacity` slots of `slot_size` bytes.
pub fn file_len(capacity: u32, slot_size: usize) -> Result<u64> {
    (capacity as u64)
        .checked_mul(slot_size as u64)
        .and_then(|slots| slots.checked_add(HEADER_SIZE as u64))
        .ok_or_else(|| QueueError::config(format!("capacity {} is too large", capacity)))
}

pub struct RecordStore {
    file: File,
    path: PathBuf,
    slot_size: usize,
    capacity: u32,
}

impl RecordStore {
    /// Creates (or truncates) the queue file and zero-fills every slot.
    pub fn create<P: AsRef<Path>>(path: P, capacity: u32, slot_size: usize) -> Result<RecordStore> {
        check_slot_size(slot_size)?;
        if capacity == 0 || capacity > i32::MAX as u32 {
            return Err(QueueError::config(format!(
                "capacity {} outside 1..={}",
                capacity,
                i32::MAX
            )));
        }
        file_len(capacity, slot_size)?;

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| QueueError::io("create queue file", e))?;
        let mut store = RecordStore {
            file,
            path,
            slot_size,
            capacity,
        };
        store.write_header(&QueueHeader::new(capacity))?;

        let zeros = vec![0u8; slot_size * INIT_CHUNK_SLOTS.min(capacity as usize)];
        let mut remaining = capacity as usize;
        while remaining > 0 {
            let n = remaining.min(INIT_CHUNK_SLOTS);
            store
                .file
                .write_all(&zeros[..n * slot_size])
                .map_err(|e| QueueError::io("initialize message storage", e))?;
            remaining -= n;
        }
        store
            .file
            .flush()
            .map_err(|e| QueueError::io("initialize message storage", e))?;
        Ok(store)
    }

    /// Opens an existing queue file without truncating it. The slot size is
    /// not stored in the file, so the file length is checked against it.
    pub fn open<P: AsRef<Path>>(path: P, slot_size: usize) -> Result<RecordStore> {
        check_slot_size(slot_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| QueueError::io("open queue file", e))?;
        let mut store = RecordStore {
            file,
            path,
            slot_size,
            capacity: 0,
        };
        let header = store.read_header()?;
        store.capacity = header.capacity;

        let expected = file_len(header.capacity, slot_size)?;
        let actual = store
            .file
            .metadata()
            .map_err(|e| QueueError::io("stat queue file", e))?
            .len();
        if actual != expected {
            return Err(QueueError::Layout(format!(
                "{} is {} bytes, expected {} for {} slots of {} bytes",
                store.path.display(),
                actual,
                expected,
                header.capacity,
                slot_size
            )));
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> u64 {
        assert!(
            index < self.capacity as usize,
            "slot index {} out of range for capacity {}",
            index,
            self.capacity
        );
        (HEADER_SIZE + index * self.slot_size) as u64
    }

    pub fn read_header(&mut self) -> Result<QueueHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| QueueError::io("read queue header", e))?;
        QueueHeader::decode(&buf)
    }

    pub fn write_header(&mut self, header: &QueueHeader) -> Result<()> {
        let buf = header.encode();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(|e| QueueError::io("write queue header", e))
    }

    /// Reads the whole slot, padding included.
    pub fn read_slot(&mut self, index: usize) -> Result<Vec<u8>> {
        let offset = self.slot_offset(index);
        let mut buf = vec![0u8; self.slot_size];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| QueueError::io("read message slot", e))?;
        Ok(buf)
    }

    /// Writes `payload` into the slot, truncated to the slot size and
    /// zero-padded when shorter.
    pub fn write_slot(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        let offset = self.slot_offset(index);
        let mut buf = vec![0u8; self.slot_size];
        let n = payload.len().min(self.slot_size);
        buf[..n].copy_from_slice(&payload[..n]);
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(|e| QueueError::io("write message slot", e))
    }
}
