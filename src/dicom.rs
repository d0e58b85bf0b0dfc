//! DICOM vocabulary shared across the crate.
//!
//! This module defines the small amount of DICOM awareness the archive
//! engine needs: attribute tags for directory naming, transfer syntaxes for
//! transcoding targets, the parsed-instance handle passed to the DICOMDIR
//! index, and the [`DirIndex`] contract itself.

use std::collections::BTreeMap;
use std::fmt;

use crate::Result;

/// A DICOM attribute tag, `(group, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DicomTag(pub u16, pub u16);

impl fmt::Display for DicomTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04x},{:04x})", self.0, self.1)
    }
}

/// Tags consulted when naming archive directories.
pub mod tags {
    use super::DicomTag;

    /// PatientID (0010,0020).
    pub const PATIENT_ID: DicomTag = DicomTag(0x0010, 0x0020);
    /// PatientName (0010,0010).
    pub const PATIENT_NAME: DicomTag = DicomTag(0x0010, 0x0010);
    /// AccessionNumber (0008,0050).
    pub const ACCESSION_NUMBER: DicomTag = DicomTag(0x0008, 0x0050);
    /// StudyDescription (0008,1030).
    pub const STUDY_DESCRIPTION: DicomTag = DicomTag(0x0008, 0x1030);
    /// Modality (0008,0060).
    pub const MODALITY: DicomTag = DicomTag(0x0008, 0x0060);
    /// SeriesDescription (0008,103E).
    pub const SERIES_DESCRIPTION: DicomTag = DicomTag(0x0008, 0x103e);
}

/// Main DICOM tags of one resource, as returned by the catalog.
pub type TagMap = BTreeMap<DicomTag, String>;

/// A DICOM transfer syntax, identified by its UID.
///
/// # Example
///
/// ```rust
/// use medizip::TransferSyntax;
///
/// let syntax = TransferSyntax::little_endian_explicit();
/// assert_eq!(syntax.uid(), "1.2.840.10008.1.2.1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferSyntax {
    uid: String,
}

impl TransferSyntax {
    /// Creates a transfer syntax from its UID.
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    /// Implicit VR Little Endian, the DICOM default (`1.2.840.10008.1.2`).
    pub fn little_endian_implicit() -> Self {
        Self::new("1.2.840.10008.1.2")
    }

    /// Explicit VR Little Endian (`1.2.840.10008.1.2.1`).
    pub fn little_endian_explicit() -> Self {
        Self::new("1.2.840.10008.1.2.1")
    }

    /// Returns the UID string.
    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

/// A DICOM instance in parsed form.
///
/// The archive engine never inspects instance internals itself; this handle
/// exists so the transcoder can hand a parsed representation straight to the
/// DICOMDIR index without a second parse.
pub struct ParsedInstance {
    bytes: Vec<u8>,
}

impl ParsedInstance {
    /// Wraps the raw encoded bytes of an instance.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the encoded bytes backing this instance.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the instance is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The DICOMDIR index built alongside a media archive.
///
/// The writer feeds the index every file it emits, in order, and asks it to
/// serialize itself once at the very end; the encoded bytes become the
/// `DICOMDIR` entry at the archive root.
pub trait DirIndex: Send {
    /// Allows SOP classes outside the standard media profiles.
    fn enable_extended_sop_class(&mut self, enabled: bool);

    /// Registers one written file under `folder/filename`.
    fn add(&mut self, folder: &str, filename: &str, instance: &ParsedInstance) -> Result<()>;

    /// Serializes the index.
    fn encode(&self) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_display() {
        assert_eq!(tags::PATIENT_ID.to_string(), "(0010,0020)");
        assert_eq!(tags::SERIES_DESCRIPTION.to_string(), "(0008,103e)");
    }

    #[test]
    fn test_tag_ordering() {
        // Tags sort by group, then element
        assert!(tags::ACCESSION_NUMBER < tags::MODALITY);
        assert!(tags::MODALITY < tags::PATIENT_NAME);
        assert!(tags::PATIENT_NAME < tags::PATIENT_ID);
    }

    #[test]
    fn test_transfer_syntax_uids() {
        assert_eq!(
            TransferSyntax::little_endian_implicit().uid(),
            "1.2.840.10008.1.2"
        );
        assert_eq!(
            TransferSyntax::little_endian_explicit().to_string(),
            "1.2.840.10008.1.2.1"
        );
    }

    #[test]
    fn test_parsed_instance_accessors() {
        let parsed = ParsedInstance::from_bytes(vec![1, 2, 3]);
        assert_eq!(parsed.bytes(), &[1, 2, 3]);
        assert_eq!(parsed.len(), 3);
        assert!(!parsed.is_empty());
    }
}
