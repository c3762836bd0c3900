//! # Capacity-Bounded Append Log
//!
//! A single-writer append log over a fixed-capacity backing file, with a
//! drain-and-reset overflow protocol. See the module docs of
//! [`crate::storage`] for the file layout and atomicity argument.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use tracing::{debug, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DRAIN_CHUNK_SIZE, LOG_FORMAT_VERSION, LOG_HEADER_SIZE, LOG_MAGIC, MIN_LOG_CAPACITY};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Bounded-log failure taxonomy.
#[derive(Debug)]
pub enum LogError {
    /// The backing resource cannot be created, opened, or validated. The
    /// log instance is unusable; not retried internally.
    Unavailable { path: PathBuf },
    /// A plain append would exceed the remaining capacity; the caller must
    /// go through the overflow protocol instead.
    WouldOverflow { requested: u64, remaining: u64 },
    /// The append after a successful drain+reset still failed. The log is
    /// left empty but the resource is intact.
    OverflowWriteFailure { requested: u64, capacity: u64 },
    /// The external sink rejected a chunk. The drain aborted and the log
    /// contents are preserved untouched.
    DrainSinkFailure,
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Unavailable { path } => {
                write!(f, "log unavailable at {:?}", path)
            }
            LogError::WouldOverflow { requested, remaining } => write!(
                f,
                "append of {} bytes exceeds remaining log capacity of {} bytes",
                requested, remaining
            ),
            LogError::OverflowWriteFailure { requested, capacity } => write!(
                f,
                "append of {} bytes failed after drain and reset (capacity {})",
                requested, capacity
            ),
            LogError::DrainSinkFailure => {
                write!(f, "drain sink rejected a chunk; log contents preserved")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Receiver for drained log contents. Called once per chunk, in append
/// order; returning an error aborts the drain with the log untouched.
pub trait DrainSink {
    fn consume(&mut self, chunk: &[u8]) -> Result<()>;
}

impl<F> DrainSink for F
where
    F: FnMut(&[u8]) -> Result<()>,
{
    fn consume(&mut self, chunk: &[u8]) -> Result<()> {
        self(chunk)
    }
}

/// On-disk log header. All multi-byte fields are little-endian; the checksum
/// is CRC64 (ECMA-182) over every preceding field and detects torn or
/// truncated header writes.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LogHeader {
    magic: [u8; 8],
    version: U32,
    _pad: [u8; 4],
    capacity: U64,
    write_offset: U64,
    checksum: U64,
    reserved: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<LogHeader>() == LOG_HEADER_SIZE);

impl LogHeader {
    fn new(capacity: u64, write_offset: u64) -> Self {
        let mut header = Self {
            magic: *LOG_MAGIC,
            version: U32::new(LOG_FORMAT_VERSION),
            _pad: [0; 4],
            capacity: U64::new(capacity),
            write_offset: U64::new(write_offset),
            checksum: U64::new(0),
            reserved: [0; 24],
        };
        header.checksum = U64::new(header.compute_checksum());
        header
    }

    fn compute_checksum(&self) -> u64 {
        let mut digest = CRC64.digest();

        digest.update(&self.magic);
        digest.update(&self.version.get().to_le_bytes());
        digest.update(&self.capacity.get().to_le_bytes());
        digest.update(&self.write_offset.get().to_le_bytes());

        digest.finalize()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= LOG_HEADER_SIZE,
            "buffer too small for LogHeader: {} < {}",
            bytes.len(),
            LOG_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..LOG_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse LogHeader: {:?}", e))?;

        ensure!(&header.magic == LOG_MAGIC, "invalid magic bytes in log header");
        ensure!(
            header.version.get() == LOG_FORMAT_VERSION,
            "unsupported log format version: {} (expected {})",
            header.version.get(),
            LOG_FORMAT_VERSION
        );
        ensure!(
            header.checksum.get() == header.compute_checksum(),
            "log header checksum mismatch"
        );
        ensure!(
            header.write_offset.get() <= header.capacity.get(),
            "log write offset {} exceeds capacity {}",
            header.write_offset.get(),
            header.capacity.get()
        );

        Ok(header)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.get()
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset.get()
    }
}

/// One open log instance. Owned exclusively by the caller that opened it;
/// mutating methods take `&mut self` so appends cannot interleave a drain.
#[derive(Debug)]
pub struct BoundedLog {
    path: PathBuf,
    file: File,
    capacity: u64,
    write_offset: u64,
}

impl BoundedLog {
    /// Create a new log with the given data capacity. The backing file is
    /// sized up front; an existing file at `path` is an error.
    pub fn create(path: &Path, capacity: u64) -> Result<Self> {
        ensure!(
            capacity >= MIN_LOG_CAPACITY,
            "log capacity {} below minimum {}",
            capacity,
            MIN_LOG_CAPACITY
        );

        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .wrap_err(LogError::Unavailable { path: path.to_path_buf() })?;

        file.set_len(LOG_HEADER_SIZE as u64 + capacity)
            .wrap_err(LogError::Unavailable { path: path.to_path_buf() })?;

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            capacity,
            write_offset: 0,
        };
        log.commit_header(0)?;

        Ok(log)
    }

    /// Open an existing log, validating its on-disk structure.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err(LogError::Unavailable { path: path.to_path_buf() })?;

        let header = Self::read_header(&mut file)
            .map_err(|e| e.wrap_err(LogError::Unavailable { path: path.to_path_buf() }))?;

        let expected_len = LOG_HEADER_SIZE as u64 + header.capacity();
        let actual_len = file
            .metadata()
            .wrap_err(LogError::Unavailable { path: path.to_path_buf() })?
            .len();
        if actual_len != expected_len {
            return Err(eyre::eyre!(
                "log file is {} bytes, expected {}",
                actual_len,
                expected_len
            )
            .wrap_err(LogError::Unavailable { path: path.to_path_buf() }));
        }

        Ok(Self {
            path: path.to_path_buf(),
            capacity: header.capacity(),
            write_offset: header.write_offset(),
            file,
        })
    }

    fn read_header(file: &mut File) -> Result<LogHeader> {
        let mut bytes = [0u8; LOG_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))
            .wrap_err("failed to seek to log header")?;
        file.read_exact(&mut bytes)
            .wrap_err("failed to read log header")?;

        LogHeader::from_bytes(&bytes).copied()
    }

    /// Persist `write_offset` as the committed log size. This is the commit
    /// point for every mutation: data written past the committed offset is
    /// logically outside the log until the header lands. Callers update
    /// their in-memory offset only after this returns, so a failed commit
    /// leaves the instance agreeing with the durable state.
    fn commit_header(&mut self, write_offset: u64) -> Result<()> {
        let header = LogHeader::new(self.capacity, write_offset);

        self.file
            .seek(SeekFrom::Start(0))
            .wrap_err("failed to seek to log header")?;
        self.file
            .write_all(header.as_bytes())
            .wrap_err("failed to write log header")?;
        self.file
            .sync_data()
            .wrap_err("failed to sync log header")?;

        Ok(())
    }

    /// Append `data`, fully or not at all. Fails with
    /// [`LogError::WouldOverflow`] when the remaining capacity is too small;
    /// the caller then goes through [`write_with_overflow`](Self::write_with_overflow).
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let len = data.len() as u64;
        let remaining = self.capacity - self.write_offset;
        if len > remaining {
            eyre::bail!(LogError::WouldOverflow { requested: len, remaining });
        }
        if data.is_empty() {
            return Ok(());
        }

        self.file
            .seek(SeekFrom::Start(LOG_HEADER_SIZE as u64 + self.write_offset))
            .wrap_err("failed to seek to log write offset")?;
        self.file
            .write_all(data)
            .wrap_err("failed to write log data")?;
        self.file
            .sync_data()
            .wrap_err("failed to sync log data")?;

        let committed = self.write_offset + len;
        self.commit_header(committed)?;
        self.write_offset = committed;

        Ok(())
    }

    /// Append with the overflow protocol.
    ///
    /// If the write fits below capacity, appends directly. Otherwise drains
    /// the entire current contents to `sink` in append order, rewinds, and
    /// appends the new data. Returns the log size *before* this call as a
    /// sequence marker.
    ///
    /// Failure modes: [`LogError::DrainSinkFailure`] leaves the log
    /// untouched; [`LogError::OverflowWriteFailure`] leaves it empty with
    /// the resource intact.
    pub fn write_with_overflow(&mut self, data: &[u8], sink: &mut dyn DrainSink) -> Result<u64> {
        let len = data.len() as u64;
        let pre_size = self.write_offset;

        if pre_size + len < self.capacity {
            self.append(data)?;
            return Ok(pre_size);
        }

        debug!(
            log = %self.path.display(),
            pending = len,
            draining = pre_size,
            "log overflow: draining to sink"
        );

        self.drain_to(sink)?;
        self.rewind()?;

        if let Err(err) = self.append(data) {
            warn!(
                log = %self.path.display(),
                requested = len,
                "append failed after drain and reset"
            );
            return Err(err.wrap_err(LogError::OverflowWriteFailure {
                requested: len,
                capacity: self.capacity,
            }));
        }

        Ok(pre_size)
    }

    /// Hand the current contents to `sink`, chunk by chunk in append order.
    /// Read-only: the log is unchanged afterwards, whatever the outcome.
    pub fn drain_to(&mut self, sink: &mut dyn DrainSink) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(LOG_HEADER_SIZE as u64))
            .wrap_err("failed to seek to log data region")?;

        let mut remaining = self.write_offset;
        let mut chunk = vec![0u8; DRAIN_CHUNK_SIZE.min(remaining as usize).max(1)];

        while remaining > 0 {
            let take = (chunk.len() as u64).min(remaining) as usize;
            self.file
                .read_exact(&mut chunk[..take])
                .wrap_err("failed to read log contents for drain")?;

            sink.consume(&chunk[..take])
                .map_err(|e| e.wrap_err(LogError::DrainSinkFailure))?;

            remaining -= take as u64;
        }

        Ok(())
    }

    /// Truncate the logical contents to empty without destroying the
    /// backing resource.
    pub fn rewind(&mut self) -> Result<()> {
        self.commit_header(0)?;
        self.write_offset = 0;

        Ok(())
    }

    /// Bytes currently in the log.
    pub fn current_size(&self) -> u64 {
        self.write_offset
    }

    /// Fixed data capacity.
    pub fn max_capacity(&self) -> u64 {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the log. Dropping the log closes the file as well;
    /// this form surfaces the final sync error.
    pub fn close(self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync log on close")
    }

    /// Validate the on-disk structure of a closed log without opening it
    /// for writes. Returns pass/fail, never an error.
    pub fn check(path: &Path) -> bool {
        fn validate(path: &Path) -> Result<()> {
            let mut file = File::open(path)?;
            let header = BoundedLog::read_header(&mut file)?;

            let expected_len = LOG_HEADER_SIZE as u64 + header.capacity();
            ensure!(
                file.metadata()?.len() == expected_len,
                "log file length mismatch"
            );
            Ok(())
        }

        validate(path).is_ok()
    }
}
