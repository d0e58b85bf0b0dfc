//! Hierarchical ZIP container writing.
//!
//! [`ZipSink`] is the single-writer primitive underneath the archive job.
//! It keeps a directory cursor (`open_directory` / `close_directory`),
//! deflates each file into memory before emitting it, and writes the
//! central directory on `close`. Because entry sizes and CRCs are known
//! before the local header goes out, the sink never seeks: it works
//! identically over a filesystem path and over a caller-owned byte stream.
//!
//! ZIP64 is decided up front via [`set_zip64`](ZipSink::set_zip64); in that
//! mode every entry carries the ZIP64 extra field and the archive ends with
//! the ZIP64 end-of-central-directory record and locator.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::{Error, Result};

const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_FILE_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x0606_4b50;
const ZIP64_END_LOCATOR_SIG: u32 = 0x0706_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const VERSION_ZIP32: u16 = 20;
const VERSION_ZIP64: u16 = 45;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// MS-DOS directory attribute bit, set on directory entries.
const EXTERNAL_ATTR_DIRECTORY: u32 = 0x10;

/// Caller-owned byte sink for synchronous archive delivery.
///
/// The archive job writes the ZIP into the stream as it is produced; on
/// cancellation the stream is told to discard whatever it buffered.
pub trait OutputStream: Send {
    /// Appends bytes to the stream.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flushes and terminates the stream.
    fn close(&mut self) -> io::Result<()>;

    /// Discards buffered state after a cancelled archive.
    fn cancel(&mut self);
}

enum SinkBackend {
    File(BufWriter<File>),
    Stream(Box<dyn OutputStream>),
}

/// Central directory bookkeeping for one written entry.
struct EntryRecord {
    name: String,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    is_directory: bool,
}

/// A file opened with `open_file`, buffered until the next operation.
struct OpenEntry {
    name: String,
    raw: Vec<u8>,
}

/// Single-writer hierarchical ZIP sink.
pub struct ZipSink {
    backend: SinkBackend,
    zip64: bool,
    offset: u64,
    directories: Vec<String>,
    entries: Vec<EntryRecord>,
    open_entry: Option<OpenEntry>,
    finished: bool,
}

impl ZipSink {
    /// Creates a sink writing to a file at `path`.
    pub fn create_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::with_backend(SinkBackend::File(BufWriter::new(file))))
    }

    /// Creates a sink writing to a caller-owned stream.
    pub fn from_stream(stream: Box<dyn OutputStream>) -> Self {
        Self::with_backend(SinkBackend::Stream(stream))
    }

    fn with_backend(backend: SinkBackend) -> Self {
        Self {
            backend,
            zip64: false,
            offset: 0,
            directories: Vec::new(),
            entries: Vec::new(),
            open_entry: None,
            finished: false,
        }
    }

    /// Selects the ZIP64 variant. Must be called before the first entry.
    pub fn set_zip64(&mut self, enabled: bool) -> Result<()> {
        if self.offset > 0 || self.open_entry.is_some() {
            return Err(Error::BadSequenceOfCalls(
                "ZIP64 mode must be selected before the first entry",
            ));
        }
        self.zip64 = enabled;
        Ok(())
    }

    /// Returns `true` if the sink writes the ZIP64 variant.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Bytes emitted so far (excluding any still-buffered open file).
    pub fn archive_size(&self) -> u64 {
        self.offset
    }

    /// Pushes a directory onto the cursor and emits its entry.
    pub fn open_directory(&mut self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.flush_open_entry()?;

        let qualified = format!("{}{}/", self.prefix(), name);
        let record = EntryRecord {
            name: qualified.clone(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_header_offset: self.offset,
            is_directory: true,
        };
        self.emit_local_header(&record, METHOD_STORED)?;
        self.entries.push(record);
        self.directories.push(format!("{}/", name));
        Ok(())
    }

    /// Pops the current directory.
    pub fn close_directory(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.flush_open_entry()?;
        if self.directories.pop().is_none() {
            return Err(Error::BadSequenceOfCalls(
                "no directory is open on the cursor",
            ));
        }
        Ok(())
    }

    /// Starts a new file under the current directory. Any previously open
    /// file is finalized first.
    pub fn open_file(&mut self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.flush_open_entry()?;
        self.open_entry = Some(OpenEntry {
            name: format!("{}{}", self.prefix(), name),
            raw: Vec::new(),
        });
        Ok(())
    }

    /// Appends bytes to the currently open file.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        match self.open_entry.as_mut() {
            Some(entry) => {
                entry.raw.extend_from_slice(data);
                Ok(())
            }
            None => Err(Error::BadSequenceOfCalls("no file is open in the sink")),
        }
    }

    /// Finalizes the archive: flushes the open file, writes the central
    /// directory and terminates the backend.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.flush_open_entry()?;
        self.write_central_directory()?;
        match &mut self.backend {
            SinkBackend::File(writer) => writer.flush()?,
            SinkBackend::Stream(stream) => stream.close()?,
        }
        self.finished = true;
        Ok(())
    }

    /// Discards buffered state on the underlying stream.
    ///
    /// File-backed sinks are unaffected; an aborted file archive is
    /// discarded by unlinking the file afterwards.
    pub fn cancel_stream(&mut self) {
        if let SinkBackend::Stream(stream) = &mut self.backend {
            stream.cancel();
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.finished {
            Err(Error::BadSequenceOfCalls("the archive is already closed"))
        } else {
            Ok(())
        }
    }

    fn prefix(&self) -> String {
        self.directories.concat()
    }

    fn flush_open_entry(&mut self) -> Result<()> {
        let entry = match self.open_entry.take() {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let crc32 = crc32fast::hash(&entry.raw);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&entry.raw)?;
        let compressed = encoder.finish()?;

        let record = EntryRecord {
            name: entry.name,
            crc32,
            compressed_size: compressed.len() as u64,
            uncompressed_size: entry.raw.len() as u64,
            local_header_offset: self.offset,
            is_directory: false,
        };
        self.emit_local_header(&record, METHOD_DEFLATED)?;
        self.emit(&compressed)?;
        self.entries.push(record);
        Ok(())
    }

    fn emit(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.backend {
            SinkBackend::File(writer) => writer.write_all(data)?,
            SinkBackend::Stream(stream) => stream.write_all(data)?,
        }
        self.offset += data.len() as u64;
        Ok(())
    }

    fn version_needed(&self) -> u16 {
        if self.zip64 {
            VERSION_ZIP64
        } else {
            VERSION_ZIP32
        }
    }

    fn emit_local_header(&mut self, record: &EntryRecord, method: u16) -> Result<()> {
        let mut header = Vec::with_capacity(64 + record.name.len());
        put_u32(&mut header, LOCAL_FILE_HEADER_SIG);
        put_u16(&mut header, self.version_needed());
        put_u16(&mut header, 0); // general purpose flags
        put_u16(&mut header, method);
        put_u16(&mut header, 0); // modification time
        put_u16(&mut header, 0); // modification date
        put_u32(&mut header, record.crc32);

        // Directory entries carry no payload; their zero sizes fit the
        // 32-bit fields even in ZIP64 mode
        let needs_extra = self.zip64 && !record.is_directory;
        if needs_extra {
            put_u32(&mut header, u32::MAX);
            put_u32(&mut header, u32::MAX);
        } else {
            put_u32(&mut header, record.compressed_size as u32);
            put_u32(&mut header, record.uncompressed_size as u32);
        }

        put_u16(&mut header, record.name.len() as u16);
        put_u16(&mut header, if needs_extra { 20 } else { 0 });
        header.extend_from_slice(record.name.as_bytes());
        if needs_extra {
            put_u16(&mut header, ZIP64_EXTRA_ID);
            put_u16(&mut header, 16);
            put_u64(&mut header, record.uncompressed_size);
            put_u64(&mut header, record.compressed_size);
        }

        self.emit(&header)
    }

    fn write_central_directory(&mut self) -> Result<()> {
        let central_offset = self.offset;
        let entry_count = self.entries.len() as u64;

        let mut central = Vec::new();
        for record in &self.entries {
            put_u32(&mut central, CENTRAL_FILE_HEADER_SIG);
            put_u16(&mut central, self.version_needed()); // version made by
            put_u16(&mut central, self.version_needed());
            put_u16(&mut central, 0); // flags
            put_u16(
                &mut central,
                if record.is_directory {
                    METHOD_STORED
                } else {
                    METHOD_DEFLATED
                },
            );
            put_u16(&mut central, 0); // modification time
            put_u16(&mut central, 0); // modification date
            put_u32(&mut central, record.crc32);

            if self.zip64 {
                put_u32(&mut central, u32::MAX);
                put_u32(&mut central, u32::MAX);
            } else {
                put_u32(&mut central, record.compressed_size as u32);
                put_u32(&mut central, record.uncompressed_size as u32);
            }

            put_u16(&mut central, record.name.len() as u16);
            put_u16(&mut central, if self.zip64 { 28 } else { 0 }); // extra length
            put_u16(&mut central, 0); // comment length
            put_u16(&mut central, 0); // disk number start
            put_u16(&mut central, 0); // internal attributes
            put_u32(
                &mut central,
                if record.is_directory {
                    EXTERNAL_ATTR_DIRECTORY
                } else {
                    0
                },
            );
            if self.zip64 {
                put_u32(&mut central, u32::MAX);
            } else {
                put_u32(&mut central, record.local_header_offset as u32);
            }
            central.extend_from_slice(record.name.as_bytes());
            if self.zip64 {
                put_u16(&mut central, ZIP64_EXTRA_ID);
                put_u16(&mut central, 24);
                put_u64(&mut central, record.uncompressed_size);
                put_u64(&mut central, record.compressed_size);
                put_u64(&mut central, record.local_header_offset);
            }
        }
        let central_size = central.len() as u64;
        self.emit(&central)?;

        if self.zip64 {
            let zip64_eocd_offset = self.offset;
            let mut tail = Vec::with_capacity(56 + 20 + 22);

            put_u32(&mut tail, ZIP64_END_OF_CENTRAL_DIR_SIG);
            put_u64(&mut tail, 44); // record size, excluding sig and this field
            put_u16(&mut tail, VERSION_ZIP64); // version made by
            put_u16(&mut tail, VERSION_ZIP64); // version needed
            put_u32(&mut tail, 0); // this disk
            put_u32(&mut tail, 0); // central directory disk
            put_u64(&mut tail, entry_count);
            put_u64(&mut tail, entry_count);
            put_u64(&mut tail, central_size);
            put_u64(&mut tail, central_offset);

            put_u32(&mut tail, ZIP64_END_LOCATOR_SIG);
            put_u32(&mut tail, 0); // disk with the ZIP64 end record
            put_u64(&mut tail, zip64_eocd_offset);
            put_u32(&mut tail, 1); // total disks

            put_u32(&mut tail, END_OF_CENTRAL_DIR_SIG);
            put_u16(&mut tail, 0);
            put_u16(&mut tail, 0);
            put_u16(&mut tail, u16::MAX);
            put_u16(&mut tail, u16::MAX);
            put_u32(&mut tail, u32::MAX);
            put_u32(&mut tail, u32::MAX);
            put_u16(&mut tail, 0); // comment length
            self.emit(&tail)?;
        } else {
            let mut tail = Vec::with_capacity(22);
            put_u32(&mut tail, END_OF_CENTRAL_DIR_SIG);
            put_u16(&mut tail, 0); // this disk
            put_u16(&mut tail, 0); // central directory disk
            put_u16(&mut tail, entry_count as u16);
            put_u16(&mut tail, entry_count as u16);
            put_u32(&mut tail, central_size as u32);
            put_u32(&mut tail, central_offset as u32);
            put_u16(&mut tail, 0); // comment length
            self.emit(&tail)?;
        }

        Ok(())
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}
