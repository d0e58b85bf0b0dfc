//! The content-addressed blob store consumed by prefetch workers.

/// Failure reading an instance payload.
#[derive(Debug, thiserror::Error)]
pub enum BlobFetchError {
    /// The payload is gone; the instance was deleted after the job was
    /// issued. Downgraded to a skipped instance by the pipeline.
    #[error("DICOM payload not found")]
    NotFound,

    /// A transient storage fault. Aborts the job.
    #[error("transient storage failure: {0}")]
    Transient(String),
}

/// Read-only access to stored DICOM payloads.
///
/// Reads happen from prefetch worker threads, so implementations must be
/// safe for concurrent use. Timeout policy belongs to the implementation;
/// the engine imposes none.
pub trait BlobStore: Send + Sync {
    /// Reads the encoded DICOM file of an instance.
    fn read_dicom(&self, instance_id: &str) -> Result<Vec<u8>, BlobFetchError>;
}
