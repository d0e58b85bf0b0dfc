//! # medizip
//!
//! An engine for packaging DICOM resources into ZIP archives and DICOM
//! interchange media.
//!
//! The crate implements the *archive job* of a DICOM store: given an
//! arbitrary set of selected resources (patients, studies, series,
//! instances), it expands the selection against the store's catalog,
//! plans a deterministic stream of ZIP operations, and drives that stream
//! through a bounded prefetch pipeline that overlaps storage reads with
//! compression. The result is a single ZIP file, either mirroring the
//! DICOM hierarchy with human-readable names, or flattened into an
//! `IMAGES/` folder with a `DICOMDIR` index (a valid interchange medium).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use medizip::{ArchiveContext, ArchiveJob, StepOutcome};
//!
//! // The context bundles the store's collaborators: catalog, blob store,
//! // transcoder and the shared media archive.
//! let mut job = ArchiveJob::archive(context);
//! job.set_description("Study export")?;
//! job.add_resource("study-public-id")?;
//! job.start()?;
//!
//! while let StepOutcome::Continue = job.step()? {}
//!
//! let zip = job.output("archive").expect("asynchronous delivery");
//! assert_eq!(zip.mime, "application/zip");
//! ```
//!
//! ## Delivery modes
//!
//! Without a synchronous target, the job materializes the archive into a
//! temporary file and retains it in the shared [`MediaArchive`] for later
//! retrieval (*asynchronous* mode). With
//! [`ArchiveJob::acquire_synchronous_target`], the ZIP is streamed into a
//! caller-owned [`OutputStream`] as it is produced.
//!
//! ## Concurrency
//!
//! The job itself is driven from a single thread; inside one `step`, a
//! bounded pool of worker threads reads instance payloads ahead of the
//! writer. Writes are strictly sequential and always follow the planned
//! command order, whatever the pool size.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod commands;
pub mod dicom;
pub mod error;
pub mod hierarchy;
pub mod job;
pub mod media_archive;
pub mod planner;
mod prefetch;
pub mod selection;
pub mod storage;
pub mod transcode;
pub mod writer;
pub mod zip;

pub use error::{Error, Result};

pub use catalog::{AttachmentInfo, Catalog};
pub use commands::{CommandStream, ZipCommand, ZipMode};
pub use dicom::{DicomTag, DirIndex, ParsedInstance, TagMap, TransferSyntax};
pub use hierarchy::{ResourceLevel, ResourcePath};
pub use job::{
    ArchiveContext, ArchiveJob, JobContent, JobOutput, StepOutcome, StopReason, TerminalKind,
};
pub use media_archive::MediaArchive;
pub use selection::{ArchiveTree, TreeVisitor};
pub use storage::{BlobFetchError, BlobStore};
pub use transcode::{Transcoded, Transcoder};
pub use writer::WriterDriver;
pub use zip::{OutputStream, ZipSink};
