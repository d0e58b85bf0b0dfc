//! Archive job lifecycle, progress and output delivery.
//!
//! An [`ArchiveJob`] is the public façade over the whole subsystem: it
//! accumulates selections, expands and plans them on
//! [`start`](ArchiveJob::start), and is then driven by the host job engine
//! through repeated [`step`](ArchiveJob::step) calls, each performing one
//! unit of work. Output is delivered either synchronously into a
//! caller-owned stream, or asynchronously through a temporary file handed
//! to the shared [`MediaArchive`] on completion.
//!
//! # Example
//!
//! ```rust,ignore
//! use medizip::{ArchiveContext, ArchiveJob, StepOutcome};
//!
//! let mut job = ArchiveJob::archive(context);
//! job.add_resource("some-study-id")?;
//! job.start()?;
//! while let StepOutcome::Continue = job.step()? {}
//! let output = job.output("archive").expect("asynchronous delivery");
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tempfile::{NamedTempFile, TempPath};
use tracing::error;

use crate::catalog::Catalog;
use crate::commands::{CommandStream, BYTES_MIB};
use crate::dicom::{DirIndex, TransferSyntax};
use crate::hierarchy::{ResourceLevel, ResourcePath};
use crate::media_archive::MediaArchive;
use crate::planner;
use crate::prefetch::{PrefetchPipeline, DEFAULT_PREFETCH_SLOTS};
use crate::selection::ArchiveTree;
use crate::storage::BlobStore;
use crate::transcode::Transcoder;
use crate::writer::WriterDriver;
use crate::zip::OutputStream;
use crate::{Error, Result};

/// Shared collaborators needed to run archive jobs.
#[derive(Clone)]
pub struct ArchiveContext {
    /// The persistent resource index.
    pub catalog: Arc<dyn Catalog>,
    /// The content-addressed payload store.
    pub blob_store: Arc<dyn BlobStore>,
    /// The transfer-syntax transcoder.
    pub transcoder: Arc<dyn Transcoder>,
    /// Retention of finished asynchronous outputs.
    pub media_archive: Arc<MediaArchive>,
}

/// Outcome of one [`ArchiveJob::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More steps remain; the engine should call again.
    Continue,
    /// The archive was finalized and delivered.
    Success,
}

/// Why the host engine stops a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The job ran to completion.
    Success,
    /// The user cancelled the job.
    Canceled,
    /// A step failed.
    Failure,
    /// The engine wants to resubmit the job elsewhere.
    Retry,
}

/// Kind of a terminal job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// The archive was produced and delivered.
    Succeeded,
    /// A step failed, or the engine requested a retry.
    Failed,
    /// The user cancelled the job.
    Cancelled,
}

enum JobState {
    Fresh,
    Running,
    Terminal(TerminalKind),
}

/// A finished archive handed back to the caller.
pub struct JobOutput {
    /// The raw ZIP bytes.
    pub bytes: Vec<u8>,
    /// MIME type of the artifact.
    pub mime: &'static str,
}

/// The job document published on the host's status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobContent {
    /// Free-form description set by the caller.
    #[serde(rename = "Description")]
    pub description: String,
    /// Number of planned instances.
    #[serde(rename = "InstancesCount")]
    pub instances_count: u32,
    /// Planned uncompressed size, in whole MiB.
    #[serde(rename = "UncompressedSizeMB")]
    pub uncompressed_size_mb: u64,
    /// Archive size so far, in whole MiB.
    #[serde(rename = "ArchiveSizeMB")]
    pub archive_size_mb: u64,
    /// Exact planned uncompressed size, as a decimal string.
    #[serde(rename = "UncompressedSize")]
    pub uncompressed_size: String,
    /// Exact archive size so far, as a decimal string.
    #[serde(rename = "ArchiveSize")]
    pub archive_size: String,
    /// UID of the transcoding target, when configured.
    #[serde(rename = "Transcode", skip_serializing_if = "Option::is_none")]
    pub transcode: Option<String>,
}

/// Packages a selected set of DICOM resources into a single ZIP archive.
pub struct ArchiveJob {
    context: ArchiveContext,
    state: JobState,
    tree: ArchiveTree,
    is_media: bool,
    dir_index: Option<Box<dyn DirIndex>>,
    description: String,
    transcode_to: Option<TransferSyntax>,
    prefetch_capacity: usize,
    temporary_directory: Option<PathBuf>,
    // Declaration order doubles as drop order: the writer holds the sink
    // over the output target, so it precedes both targets
    writer: Option<WriterDriver>,
    pipeline: Option<PrefetchPipeline>,
    synchronous_target: Option<Box<dyn OutputStream>>,
    asynchronous_target: Option<TempPath>,
    total_steps: usize,
    current_step: usize,
    instance_count: u32,
    uncompressed_size: u64,
    archive_size: u64,
    media_archive_id: Option<String>,
}

impl ArchiveJob {
    /// Creates a job producing the hierarchical archive layout.
    pub fn archive(context: ArchiveContext) -> Self {
        Self::with_flavor(context, None)
    }

    /// Creates a job producing the flat media layout with a `DICOMDIR`
    /// entry built by `dir_index`.
    pub fn media(
        context: ArchiveContext,
        mut dir_index: Box<dyn DirIndex>,
        extended_sop_class: bool,
    ) -> Self {
        dir_index.enable_extended_sop_class(extended_sop_class);
        Self::with_flavor(context, Some(dir_index))
    }

    fn with_flavor(context: ArchiveContext, dir_index: Option<Box<dyn DirIndex>>) -> Self {
        Self {
            context,
            state: JobState::Fresh,
            tree: ArchiveTree::new(ResourceLevel::Patient),
            is_media: dir_index.is_some(),
            dir_index,
            description: String::new(),
            transcode_to: None,
            prefetch_capacity: DEFAULT_PREFETCH_SLOTS,
            temporary_directory: None,
            writer: None,
            pipeline: None,
            synchronous_target: None,
            asynchronous_target: None,
            total_steps: 0,
            current_step: 0,
            instance_count: 0,
            uncompressed_size: 0,
            archive_size: 0,
            media_archive_id: None,
        }
    }

    /// `"Archive"` or `"Media"`, for the host's job listing.
    pub fn kind(&self) -> &'static str {
        if self.is_media {
            "Media"
        } else {
            "Archive"
        }
    }

    fn ensure_fresh(&self) -> Result<()> {
        match self.state {
            JobState::Fresh => Ok(()),
            _ => Err(Error::BadSequenceOfCalls("the job was already started")),
        }
    }

    /// Resolves a public identifier and merges it into the selection.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownResource`] if the identifier cannot be resolved;
    /// [`Error::BadSequenceOfCalls`] once the job was started.
    pub fn add_resource(&mut self, public_id: &str) -> Result<()> {
        self.ensure_fresh()?;
        let path = ResourcePath::resolve(self.context.catalog.as_ref(), public_id)?;
        self.tree.add(self.context.catalog.as_ref(), &path)
    }

    /// Requests transcoding of every instance to `syntax`, best effort.
    pub fn set_transcode(&mut self, syntax: TransferSyntax) -> Result<()> {
        self.ensure_fresh()?;
        self.transcode_to = Some(syntax);
        Ok(())
    }

    /// Sets the description shown in the published job content.
    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.ensure_fresh()?;
        self.description = description.into();
        Ok(())
    }

    /// Overrides the number of read-ahead slots (minimum one).
    pub fn set_prefetch_capacity(&mut self, slots: usize) -> Result<()> {
        self.ensure_fresh()?;
        self.prefetch_capacity = slots.max(1);
        Ok(())
    }

    /// Overrides where the asynchronous temporary file is created.
    pub fn set_temporary_directory(&mut self, directory: impl Into<PathBuf>) -> Result<()> {
        self.ensure_fresh()?;
        self.temporary_directory = Some(directory.into());
        Ok(())
    }

    /// Takes ownership of a caller-provided stream; the archive will be
    /// delivered into it while the job runs. Exclusive with asynchronous
    /// mode.
    pub fn acquire_synchronous_target(&mut self, stream: Box<dyn OutputStream>) -> Result<()> {
        self.ensure_fresh()?;
        if self.synchronous_target.is_some() {
            return Err(Error::BadSequenceOfCalls(
                "an output target was already acquired",
            ));
        }
        self.synchronous_target = Some(stream);
        Ok(())
    }

    /// Expands the selection, plans the command stream and opens the
    /// writer. Without a synchronous target, a temporary file is created
    /// and the job runs in asynchronous mode.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_fresh()?;

        self.tree.expand(self.context.catalog.as_ref());

        let mut commands = CommandStream::new();
        if self.is_media {
            planner::plan_media_layout(&self.tree, &mut commands)?;
        } else {
            planner::plan_archive_layout(&self.tree, self.context.catalog.as_ref(), &mut commands)?;
        }
        commands.seal();

        self.instance_count = commands.instance_count();
        self.uncompressed_size = commands.uncompressed_size();

        let mut writer = WriterDriver::new(
            commands,
            self.dir_index.take(),
            Arc::clone(&self.context.transcoder),
            self.transcode_to.clone(),
        );

        match self.synchronous_target.take() {
            Some(stream) => writer.acquire_output_stream(stream)?,
            None => {
                let file = match &self.temporary_directory {
                    Some(dir) => NamedTempFile::new_in(dir)?,
                    None => NamedTempFile::new()?,
                };
                let path = file.into_temp_path();
                writer.set_output_file(&path)?;
                self.asynchronous_target = Some(path);
            }
        }

        self.total_steps = writer.steps_count();
        self.writer = Some(writer);
        self.pipeline = Some(PrefetchPipeline::new(
            Arc::clone(&self.context.blob_store),
            self.prefetch_capacity,
        ));
        self.current_step = 0;
        self.state = JobState::Running;
        Ok(())
    }

    /// Executes exactly one unit of work.
    ///
    /// On error the sink stream is cancelled and the error propagates; the
    /// host engine is expected to follow up with
    /// [`stop(Failure)`](Self::stop).
    pub fn step(&mut self) -> Result<StepOutcome> {
        if !matches!(self.state, JobState::Running) {
            return Err(Error::BadSequenceOfCalls("the job is not running"));
        }

        match self.run_one_step() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "error while creating an archive");
                if let Some(writer) = self.writer.as_mut() {
                    writer.cancel_stream();
                }
                Err(e)
            }
        }
    }

    fn writer_mut(&mut self) -> Result<&mut WriterDriver> {
        self.writer
            .as_mut()
            .ok_or(Error::Internal("job is running without a writer"))
    }

    fn pipeline_mut(&mut self) -> Result<&mut PrefetchPipeline> {
        self.pipeline
            .as_mut()
            .ok_or(Error::Internal("job is running without a prefetch pool"))
    }

    /// Applies the oldest in-flight payload as a write step. Returns
    /// `false` when the pool was idle.
    fn apply_front_slot(&mut self) -> Result<bool> {
        match self.pipeline_mut()?.drain_front()? {
            Some((index, payload)) => {
                self.writer_mut()?.run_step(index, payload.as_deref())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn drain_all_slots(&mut self) -> Result<()> {
        while self.apply_front_slot()? {}
        Ok(())
    }

    fn run_one_step(&mut self) -> Result<StepOutcome> {
        let total_steps = self.writer_mut()?.steps_count();

        if self.current_step != total_steps - 1 {
            let step = self.current_step;
            if self.writer_mut()?.is_write_instance(step) {
                if self.pipeline_mut()?.is_full() {
                    self.apply_front_slot()?;
                }
                let instance_id = self
                    .writer_mut()?
                    .write_instance_id(step)
                    .ok_or(Error::Internal("write command without an instance"))?
                    .to_string();
                self.pipeline_mut()?.launch(step, &instance_id)?;
            } else {
                // Directory commands are barriers: every in-flight read is
                // applied before the boundary moves
                self.drain_all_slots()?;
                self.writer_mut()?.run_step(step, None)?;
            }
        } else {
            self.drain_all_slots()?;
            self.writer_mut()?.last_step()?;
        }

        self.current_step += 1;

        if self.current_step == total_steps {
            self.finalize_target()?;
            self.state = JobState::Terminal(TerminalKind::Succeeded);
            Ok(StepOutcome::Success)
        } else {
            self.archive_size = self.writer_mut()?.archive_size();
            Ok(StepOutcome::Continue)
        }
    }

    /// Fraction of completed steps in `[0, 1]`, non-decreasing.
    ///
    /// A cancelled or failed job keeps the fraction it had reached; only a
    /// job with at most one step, or one that ran to success, reports 1.
    pub fn progress(&self) -> f32 {
        if self.total_steps <= 1 {
            return 1.0;
        }
        let ratio = (self.current_step as f32) / ((self.total_steps - 1) as f32);
        ratio.min(1.0)
    }

    /// Stops the job. On `Canceled`, `Failure` and `Retry` the sink is
    /// cancelled, workers are joined and both output targets are released
    /// (deleting the asynchronous temporary file). Terminal afterwards.
    pub fn stop(&mut self, reason: StopReason) {
        match reason {
            StopReason::Success => {
                self.state = JobState::Terminal(TerminalKind::Succeeded);
            }
            StopReason::Canceled | StopReason::Failure | StopReason::Retry => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.abort();
                }
                if let Some(writer) = self.writer.as_mut() {
                    writer.cancel_stream();
                }
                // The writer holds the sink over the output target, so it
                // goes first
                self.writer = None;
                self.pipeline = None;
                self.synchronous_target = None;
                self.asynchronous_target = None;
                self.state = JobState::Terminal(match reason {
                    StopReason::Canceled => TerminalKind::Cancelled,
                    _ => TerminalKind::Failed,
                });
            }
        }
    }

    /// Closes the writer, records the final archive size and, in
    /// asynchronous mode, hands the temporary file to the shared media
    /// archive.
    pub fn finalize_target(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.close()?;
            self.archive_size = writer.archive_size();
        }
        self.writer = None;
        self.pipeline = None;

        if let Some(path) = self.asynchronous_target.take() {
            self.media_archive_id = Some(self.context.media_archive.add(path));
        }
        Ok(())
    }

    /// Archive creation is not resubmittable.
    pub fn reset(&mut self) -> Result<()> {
        Err(Error::BadSequenceOfCalls(
            "cannot resubmit the creation of an archive",
        ))
    }

    /// The terminal state, once reached.
    pub fn terminal_kind(&self) -> Option<TerminalKind> {
        match self.state {
            JobState::Terminal(kind) => Some(kind),
            _ => None,
        }
    }

    /// Number of planned instances (snapshot taken at start).
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Planned uncompressed size in bytes (snapshot taken at start).
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Archive bytes produced so far.
    pub fn archive_size(&self) -> u64 {
        self.archive_size
    }

    /// The document published on the host's status endpoint.
    pub fn public_content(&self) -> JobContent {
        JobContent {
            description: self.description.clone(),
            instances_count: self.instance_count,
            uncompressed_size_mb: self.uncompressed_size / BYTES_MIB,
            archive_size_mb: self.archive_size / BYTES_MIB,
            uncompressed_size: self.uncompressed_size.to_string(),
            archive_size: self.archive_size.to_string(),
            transcode: self.transcode_to.as_ref().map(|s| s.uid().to_string()),
        }
    }

    /// Returns the finished archive in asynchronous mode.
    ///
    /// Only the `"archive"` key is recognized, and only once the job
    /// finalized an asynchronous target; anything else yields `None`.
    pub fn output(&self, key: &str) -> Option<JobOutput> {
        if key != "archive" {
            return None;
        }
        let id = self.media_archive_id.as_deref()?;
        let bytes = self.context.media_archive.read(id)?;
        Some(JobOutput {
            bytes,
            mime: "application/zip",
        })
    }
}

impl Drop for ArchiveJob {
    fn drop(&mut self) {
        // Same ordering as `stop`: workers are joined before their buffers
        // go away, and the writer is released before either output target,
        // even when a running job is dropped without a `stop` call
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.abort();
        }
        self.writer = None;
        self.pipeline = None;

        if let Some(id) = self.media_archive_id.take() {
            self.context.media_archive.remove(&id);
        }
    }
}
