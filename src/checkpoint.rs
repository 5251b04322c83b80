//! Checkpoint log codec.
//!
//! A stream's checkpoint file is an append-only sequence of records, each a
//! varint length prefix followed by a MessagePack-encoded body. Writers sync
//! every record before returning. Readers stop cleanly at a torn tail record
//! (partial length, length past end of file, or partial body); recovery then
//! truncates the file back to the last record boundary.

use crate::error::{RelayError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A single checkpoint log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CheckpointRecord<U> {
    /// A status update accepted into the stream.
    Update(U),
    /// Acknowledgement of the update with this status UUID.
    Ack(Uuid),
}

/// Append handle to a stream's checkpoint file.
pub struct CheckpointFile {
    path: PathBuf,
    file: File,
}

impl CheckpointFile {
    /// Create a new checkpoint file.
    ///
    /// The file must not already exist (a leftover file is recovery's
    /// business, not creation's); missing parent directories are created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RelayError::CheckpointExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, file })
    }

    /// Adopt an already-open handle after recovery has truncated it to the
    /// end of the last valid record.
    pub(crate) fn from_recovered(path: PathBuf, file: File) -> Self {
        Self { path, file }
    }

    /// Append one record and sync it to stable storage.
    ///
    /// When this returns `Ok`, the record is durable.
    pub fn append<U: Serialize>(&mut self, record: &CheckpointRecord<U>) -> Result<()> {
        let body = rmp_serde::to_vec(record)?;

        let mut buf = Vec::with_capacity(body.len() + 5);
        write_varint(&mut buf, body.len() as u64);
        buf.extend_from_slice(&body);

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_all()?;

        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sequential reader over a checkpoint file.
pub struct RecordReader<'a> {
    file: &'a mut File,
    /// End offset of the last fully decoded record.
    offset: u64,
    /// File length at the time the reader was created.
    len: u64,
}

impl<'a> RecordReader<'a> {
    /// Start reading from the beginning of the file.
    pub fn new(file: &'a mut File) -> Result<Self> {
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            offset: 0,
            len,
        })
    }

    /// Offset just past the last fully decoded record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` both on a clean end of log and on a torn tail
    /// record, leaving [`offset`](Self::offset) at the last record
    /// boundary. A fully present body that fails to decode is a
    /// deserialization error; a corrupt length prefix is corruption.
    pub fn read_next<U: DeserializeOwned>(&mut self) -> Result<Option<CheckpointRecord<U>>> {
        let len = match read_varint(self.file)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let body_start = self.file.stream_position()?;
        if body_start + len > self.len {
            // Torn tail: the record body was never fully written.
            return Ok(None);
        }

        let mut body = vec![0u8; len as usize];
        self.file.read_exact(&mut body)?;

        let record = rmp_serde::from_slice(&body)?;

        self.offset = body_start + len;
        Ok(Some(record))
    }
}

/// LEB128-encode `value` into `buf`.
fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// LEB128-decode one value. `Ok(None)` if the input ends before the varint
/// completes (absent or torn length prefix).
fn read_varint(reader: &mut impl Read) -> Result<Option<u64>> {
    let mut value = 0u64;
    let mut shift = 0u32;

    loop {
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }

        shift += 7;
        if shift >= 64 {
            return Err(RelayError::Corruption(
                "varint length prefix overflows u64".into(),
            ));
        }
    }
}
