//! The ordered stream of ZIP operations produced by planning.
//!
//! A [`CommandStream`] is the linear encoding of a hierarchical archive:
//! directory opens and closes interleaved with file writes, in exactly the
//! order the writer must execute them. The stream keeps aggregate counters
//! while it is built; those aggregates drive the ZIP32/ZIP64 decision at
//! writer open.

use crate::{Error, Result};

/// IEC byte unit: 1 MiB.
pub(crate) const BYTES_MIB: u64 = 1024 * 1024;
/// IEC byte unit: 1 GiB.
pub(crate) const BYTES_GIB: u64 = 1024 * BYTES_MIB;

/// Headroom below the 2 GiB ZIP32 limit, large enough to hold a DICOMDIR.
const ZIP32_SIZE_MARGIN: u64 = 64 * BYTES_MIB;
/// Headroom below the 65535-entry ZIP32 limit, for per-file overhead.
const ZIP32_COUNT_MARGIN: u32 = 10;

/// One ZIP operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipCommand {
    /// Push a directory onto the hierarchical cursor.
    OpenDirectory {
        /// Directory name, relative to the current cursor.
        name: String,
    },
    /// Pop the current directory.
    CloseDirectory,
    /// Emit one DICOM file under the current cursor.
    WriteInstance {
        /// File name within the current directory.
        filename: String,
        /// Instance whose payload fills the file.
        instance_id: String,
        /// Size of the encoded instance, per the catalog.
        uncompressed_size: u64,
    },
}

/// The container format variant selected at writer open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMode {
    /// Classic ZIP: up to 2 GiB of data and 65535 entries.
    Zip32,
    /// ZIP64 extension, no practical limits.
    Zip64,
}

impl ZipMode {
    /// Selects the format for the given aggregates, leaving headroom for
    /// the DICOMDIR entry and per-file overhead.
    pub fn for_aggregates(uncompressed_size: u64, instance_count: u32) -> ZipMode {
        if uncompressed_size >= 2 * BYTES_GIB - ZIP32_SIZE_MARGIN
            || instance_count >= 65_535 - ZIP32_COUNT_MARGIN
        {
            ZipMode::Zip64
        } else {
            ZipMode::Zip32
        }
    }
}

/// Append-only sequence of ZIP operations with aggregate counters.
///
/// The stream is built by the planner, sealed by the job, and then
/// consumed one command at a time by the writer driver.
#[derive(Default)]
pub struct CommandStream {
    commands: Vec<ZipCommand>,
    uncompressed_size: u64,
    instance_count: u32,
    sealed: bool,
}

impl CommandStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands in the stream.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no command was appended yet.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sum of the uncompressed sizes of every planned instance.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Number of planned instances.
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Appends a directory open.
    pub fn push_open_directory(&mut self, name: &str) -> Result<()> {
        self.ensure_unsealed()?;
        self.commands.push(ZipCommand::OpenDirectory {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Appends a directory close.
    pub fn push_close_directory(&mut self) -> Result<()> {
        self.ensure_unsealed()?;
        self.commands.push(ZipCommand::CloseDirectory);
        Ok(())
    }

    /// Appends a file write and updates the aggregates.
    pub fn push_write_instance(
        &mut self,
        filename: &str,
        instance_id: &str,
        uncompressed_size: u64,
    ) -> Result<()> {
        self.ensure_unsealed()?;
        self.commands.push(ZipCommand::WriteInstance {
            filename: filename.to_string(),
            instance_id: instance_id.to_string(),
            uncompressed_size,
        });
        self.instance_count += 1;
        self.uncompressed_size += uncompressed_size;
        Ok(())
    }

    /// Freezes the stream; further appends fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns `true` once the stream is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// The command at `index`.
    pub fn get(&self, index: usize) -> Option<&ZipCommand> {
        self.commands.get(index)
    }

    /// Returns `true` if the command at `index` writes a file.
    pub fn is_write_instance(&self, index: usize) -> bool {
        matches!(self.commands.get(index), Some(ZipCommand::WriteInstance { .. }))
    }

    /// The container format implied by the aggregates.
    pub fn zip_mode(&self) -> ZipMode {
        ZipMode::for_aggregates(self.uncompressed_size, self.instance_count)
    }

    fn ensure_unsealed(&self) -> Result<()> {
        if self.sealed {
            Err(Error::BadSequenceOfCalls("the command stream is sealed"))
        } else {
            Ok(())
        }
    }
}
