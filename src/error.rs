//! Error types for archive job operations.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when planning and writing a DICOM archive, along with a
//! convenient [`Result<T>`] type alias.
//!
//! All fallible operations in this crate return `Result<T, Error>`. Errors
//! fall into a few categories:
//!
//! | Category | Variants | Typical cause |
//! |----------|----------|---------------|
//! | Selection | [`UnknownResource`][Self::UnknownResource] | Catalog miss while resolving a selection |
//! | API misuse | [`BadSequenceOfCalls`][Self::BadSequenceOfCalls], [`ParameterOutOfRange`][Self::ParameterOutOfRange] | Mutating a started job, double-open, step index past end |
//! | Collaborators | [`Storage`][Self::Storage], [`DirIndex`][Self::DirIndex], [`Io`][Self::Io] | Blob store, index encoder, sink failures |
//! | Invariants | [`Internal`][Self::Internal] | A broken internal invariant |
//!
//! Two conditions are deliberately *not* errors: a per-instance `NotFound`
//! from the blob store during prefetch (the instance was deleted after the
//! job was issued; it is skipped with a warning) and an unsupported
//! transcoding target (the original bytes are written unchanged).

use std::io;

/// The main error type for archive job operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred while writing the archive.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A selected resource, or one of its parents, does not exist in the
    /// catalog.
    ///
    /// This surfaces synchronously from [`ArchiveJob::add_resource`] when
    /// the public identifier cannot be resolved.
    ///
    /// [`ArchiveJob::add_resource`]: crate::job::ArchiveJob::add_resource
    #[error("unknown resource: {id}")]
    UnknownResource {
        /// The public identifier that failed to resolve.
        id: String,
    },

    /// The API was called in an order it does not support.
    ///
    /// Examples: adding a resource after the job was started, opening the
    /// writer target twice, resubmitting an archive job.
    #[error("bad sequence of calls: {0}")]
    BadSequenceOfCalls(&'static str),

    /// A step index was past the end of the command stream.
    #[error("step index {index} out of range (limit {limit})")]
    ParameterOutOfRange {
        /// The offending index.
        index: usize,
        /// The number of commands in the stream.
        limit: usize,
    },

    /// The blob store failed transiently while reading an instance payload.
    ///
    /// Unlike a plain `NotFound` (which downgrades to a skipped instance),
    /// a transient storage fault aborts the whole job.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The DICOMDIR index encoder rejected an instance or failed to encode.
    #[error("DICOMDIR index failure: {0}")]
    DirIndex(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Returns `true` if this error indicates API misuse by the caller.
    ///
    /// Misuse errors are programming mistakes in the host, not runtime
    /// conditions, and retrying the same call cannot succeed.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::BadSequenceOfCalls(_) | Error::ParameterOutOfRange { .. }
        )
    }

    /// Returns `true` if the operation might succeed when tried again.
    ///
    /// Only transient storage faults and transient I/O kinds qualify; a
    /// failed archive job itself is never resumable.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// A specialized Result type for archive job operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_unknown_resource_message() {
        let err = Error::UnknownResource {
            id: "deadbeef".into(),
        };
        assert_eq!(err.to_string(), "unknown resource: deadbeef");
        assert!(!err.is_misuse());
    }

    #[test]
    fn test_misuse_classification() {
        assert!(Error::BadSequenceOfCalls("already started").is_misuse());
        assert!(Error::ParameterOutOfRange { index: 9, limit: 3 }.is_misuse());
        assert!(!Error::Storage("timeout".into()).is_misuse());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Storage("connection reset".into()).is_transient());
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "t")).is_transient());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::NotFound, "n")).is_transient());
        assert!(!Error::Internal("broken").is_transient());
    }

    #[test]
    fn test_parameter_out_of_range_message() {
        let err = Error::ParameterOutOfRange { index: 12, limit: 11 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("11"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
