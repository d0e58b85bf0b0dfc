//! Execution of a sealed command stream against a ZIP sink.
//!
//! The [`WriterDriver`] binds the planned commands to a [`ZipSink`] and,
//! in media mode, to the DICOMDIR index. It executes exactly one command
//! per external step; the step count is one larger than the stream because
//! the terminal step emits the `DICOMDIR` entry (a no-op for plain
//! archives).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::commands::{CommandStream, ZipCommand, ZipMode, BYTES_MIB};
use crate::dicom::{DirIndex, ParsedInstance, TransferSyntax};
use crate::planner::MEDIA_IMAGES_FOLDER;
use crate::transcode::Transcoder;
use crate::zip::{OutputStream, ZipSink};
use crate::{Error, Result};

/// Drives a sealed command stream through a ZIP sink, one step at a time.
pub struct WriterDriver {
    commands: CommandStream,
    sink: Option<ZipSink>,
    dir_index: Option<Box<dyn DirIndex>>,
    transcoder: Arc<dyn Transcoder>,
    transcode_to: Option<TransferSyntax>,
}

impl WriterDriver {
    /// Binds the sealed stream, the optional DICOMDIR index (media mode)
    /// and the transcoding configuration. The output target is attached
    /// separately through [`set_output_file`](Self::set_output_file) or
    /// [`acquire_output_stream`](Self::acquire_output_stream).
    pub fn new(
        commands: CommandStream,
        dir_index: Option<Box<dyn DirIndex>>,
        transcoder: Arc<dyn Transcoder>,
        transcode_to: Option<TransferSyntax>,
    ) -> Self {
        Self {
            commands,
            sink: None,
            dir_index,
            transcoder,
            transcode_to,
        }
    }

    /// Opens the writer against a file path (asynchronous delivery).
    pub fn set_output_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_unopened()?;
        let mut sink = ZipSink::create_file(path)?;
        sink.set_zip64(self.select_zip_mode() == ZipMode::Zip64)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// Opens the writer against a caller-owned stream (synchronous
    /// delivery).
    pub fn acquire_output_stream(&mut self, stream: Box<dyn OutputStream>) -> Result<()> {
        self.ensure_unopened()?;
        let mut sink = ZipSink::from_stream(stream);
        sink.set_zip64(self.select_zip_mode() == ZipMode::Zip64)?;
        self.sink = Some(sink);
        Ok(())
    }

    fn ensure_unopened(&self) -> Result<()> {
        if self.sink.is_some() {
            Err(Error::BadSequenceOfCalls(
                "the writer target was already opened",
            ))
        } else {
            Ok(())
        }
    }

    fn select_zip_mode(&self) -> ZipMode {
        let mode = self.commands.zip_mode();
        info!(
            instances = self.commands.instance_count(),
            size_mb = self.commands.uncompressed_size() / BYTES_MIB,
            zip64 = matches!(mode, ZipMode::Zip64),
            "creating ZIP archive"
        );
        mode
    }

    /// Total number of external steps: every command plus the terminal
    /// DICOMDIR step.
    pub fn steps_count(&self) -> usize {
        self.commands.len() + 1
    }

    /// Returns `true` if the command at `index` writes a file.
    pub fn is_write_instance(&self, index: usize) -> bool {
        self.commands.is_write_instance(index)
    }

    /// The instance behind the write command at `index`, if any.
    pub(crate) fn write_instance_id(&self, index: usize) -> Option<&str> {
        match self.commands.get(index) {
            Some(ZipCommand::WriteInstance { instance_id, .. }) => Some(instance_id),
            _ => None,
        }
    }

    /// Executes the command at `index`.
    ///
    /// `payload` carries the DICOM bytes for `WriteInstance` commands and
    /// is ignored otherwise; a `None` payload skips the write (the
    /// instance was deleted after planning). An `index` equal to the
    /// stream length is a no-op, anything beyond is
    /// [`Error::ParameterOutOfRange`].
    pub fn run_step(&mut self, index: usize, payload: Option<&[u8]>) -> Result<()> {
        let limit = self.commands.len();
        if index > limit {
            return Err(Error::ParameterOutOfRange { index, limit });
        }

        let sink = self
            .sink
            .as_mut()
            .ok_or(Error::BadSequenceOfCalls("the writer target is not open"))?;

        if index == limit {
            return Ok(());
        }

        let command = self
            .commands
            .get(index)
            .ok_or(Error::Internal("command stream shrank mid-run"))?;

        match command {
            ZipCommand::OpenDirectory { name } => sink.open_directory(name),
            ZipCommand::CloseDirectory => sink.close_directory(),
            ZipCommand::WriteInstance {
                filename,
                instance_id,
                ..
            } => {
                let bytes = match payload {
                    Some(bytes) => bytes,
                    None => return Ok(()), // deleted instance, skipped
                };

                sink.open_file(filename)?;

                if let Some(syntax) = &self.transcode_to {
                    let mut accepted = BTreeSet::new();
                    accepted.insert(syntax.clone());

                    if let Some(transcoded) = self.transcoder.transcode(bytes, &accepted, true) {
                        sink.write(&transcoded.bytes)?;
                        if let Some(dir) = self.dir_index.as_mut() {
                            dir.add(MEDIA_IMAGES_FOLDER, filename, &transcoded.parsed)?;
                        }
                        return Ok(());
                    }

                    info!(
                        instance = instance_id.as_str(),
                        syntax = syntax.uid(),
                        "cannot transcode instance to the requested transfer syntax"
                    );
                }

                sink.write(bytes)?;
                if let Some(dir) = self.dir_index.as_mut() {
                    let parsed = ParsedInstance::from_bytes(bytes.to_vec());
                    dir.add(MEDIA_IMAGES_FOLDER, filename, &parsed)?;
                }
                Ok(())
            }
        }
    }

    /// The terminal step: in media mode, serialize the DICOMDIR index and
    /// write it at the archive root.
    pub fn last_step(&mut self) -> Result<()> {
        if let Some(dir) = self.dir_index.as_ref() {
            let encoded = dir.encode()?;
            let sink = self
                .sink
                .as_mut()
                .ok_or(Error::BadSequenceOfCalls("the writer target is not open"))?;
            sink.open_file("DICOMDIR")?;
            sink.write(&encoded)?;
        }
        Ok(())
    }

    /// Discards buffered state on a stream-backed sink.
    pub fn cancel_stream(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.cancel_stream();
        }
    }

    /// Finalizes the ZIP central directory.
    pub fn close(&mut self) -> Result<()> {
        self.sink
            .as_mut()
            .ok_or(Error::BadSequenceOfCalls("the writer target is not open"))?
            .close()
    }

    /// Bytes emitted so far.
    pub fn archive_size(&self) -> u64 {
        self.sink.as_ref().map(ZipSink::archive_size).unwrap_or(0)
    }

    /// Number of planned instances.
    pub fn instance_count(&self) -> u32 {
        self.commands.instance_count()
    }

    /// Sum of the planned uncompressed sizes.
    pub fn uncompressed_size(&self) -> u64 {
        self.commands.uncompressed_size()
    }
}
