//! The persistent resource catalog consumed by archive jobs.
//!
//! The catalog is the store's index of patients, studies, series and
//! instances. The archive engine only reads from it: resolving selections,
//! expanding them to concrete instances, and fetching the main DICOM tags
//! used for directory naming. Implementations must be safe for concurrent
//! reads.

use crate::dicom::TagMap;
use crate::hierarchy::ResourceLevel;

/// Metadata of a stored DICOM attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentInfo {
    /// Size of the encoded DICOM file in bytes.
    pub uncompressed_size: u64,
    /// Storage revision of the attachment.
    pub revision: i64,
}

/// Read-only view of the resource index.
pub trait Catalog: Send + Sync {
    /// Returns the hierarchy level of a public identifier, or `None` if the
    /// resource does not exist.
    fn lookup_level(&self, public_id: &str) -> Option<ResourceLevel>;

    /// Returns the identifier of the direct parent, or `None` for unknown
    /// resources and patients.
    fn lookup_parent(&self, public_id: &str) -> Option<String>;

    /// Returns the identifiers of the direct children, in catalog order.
    fn children(&self, public_id: &str) -> Vec<String>;

    /// Returns the main DICOM tags of a resource at the given level, or
    /// `None` if the resource vanished.
    fn main_dicom_tags(&self, public_id: &str, level: ResourceLevel) -> Option<TagMap>;

    /// Returns the DICOM attachment metadata of an instance, or `None` if
    /// the attachment is gone.
    fn lookup_attachment(&self, instance_id: &str) -> Option<AttachmentInfo>;
}
