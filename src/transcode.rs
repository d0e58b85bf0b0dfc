//! The transfer-syntax transcoder consumed by the writer.

use std::collections::BTreeSet;

use crate::dicom::{ParsedInstance, TransferSyntax};

/// A successfully transcoded instance.
pub struct Transcoded {
    /// The re-encoded DICOM file.
    pub bytes: Vec<u8>,
    /// The parsed form of the re-encoded file, handed to the DICOMDIR
    /// index in media mode.
    pub parsed: ParsedInstance,
}

/// Converts DICOM instances between transfer syntaxes.
///
/// The writer calls the transcoder with a singleton set holding the job's
/// target syntax. Returning `None` means the conversion is unsupported for
/// this instance; the writer then falls back to the original bytes, so an
/// unsupported target never fails the archive.
pub trait Transcoder: Send + Sync {
    /// Attempts to re-encode `source` into one of the accepted syntaxes.
    fn transcode(
        &self,
        source: &[u8],
        accepted: &BTreeSet<TransferSyntax>,
        allow_new_sop_instance_uid: bool,
    ) -> Option<Transcoded>;
}
