//! Shared test utilities for integration tests.
//!
//! This module provides the in-memory collaborators the archive engine is
//! exercised against (catalog, blob store, transcoder, DICOMDIR index,
//! output stream) plus raw-byte inspection helpers for the produced ZIP.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test
//! file compiles as a separate crate and may only use a subset of these
//! helpers.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use medizip::dicom::tags;
use medizip::{
    ArchiveContext, AttachmentInfo, BlobFetchError, BlobStore, Catalog, DirIndex, MediaArchive,
    OutputStream, ParsedInstance, ResourceLevel, TagMap, Transcoded, Transcoder, TransferSyntax,
};

// ---------------------------------------------------------------------------
// Catalog fixture
// ---------------------------------------------------------------------------

/// In-memory catalog built from explicit parent/child registrations.
#[derive(Default)]
pub struct FixtureCatalog {
    levels: HashMap<String, ResourceLevel>,
    parents: HashMap<String, String>,
    children: HashMap<String, Vec<String>>,
    tags: HashMap<(String, ResourceLevel), TagMap>,
    attachments: HashMap<String, u64>,
    pub dropped_attachments: HashSet<String>,
}

impl FixtureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, parent: Option<&str>, id: &str, level: ResourceLevel) {
        self.levels.insert(id.to_string(), level);
        if let Some(parent) = parent {
            self.parents.insert(id.to_string(), parent.to_string());
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    pub fn add_patient(&mut self, id: &str, patient_id: &str, patient_name: &str) {
        self.register(None, id, ResourceLevel::Patient);
        let mut map = TagMap::new();
        map.insert(tags::PATIENT_ID, patient_id.to_string());
        map.insert(tags::PATIENT_NAME, patient_name.to_string());
        self.tags
            .insert((id.to_string(), ResourceLevel::Patient), map);
    }

    pub fn add_study(&mut self, patient: &str, id: &str, accession: &str, description: &str) {
        self.register(Some(patient), id, ResourceLevel::Study);
        let mut map = TagMap::new();
        map.insert(tags::ACCESSION_NUMBER, accession.to_string());
        map.insert(tags::STUDY_DESCRIPTION, description.to_string());
        self.tags.insert((id.to_string(), ResourceLevel::Study), map);
    }

    pub fn add_series(&mut self, study: &str, id: &str, modality: &str, description: &str) {
        self.register(Some(study), id, ResourceLevel::Series);
        let mut map = TagMap::new();
        map.insert(tags::MODALITY, modality.to_string());
        map.insert(tags::SERIES_DESCRIPTION, description.to_string());
        self.tags
            .insert((id.to_string(), ResourceLevel::Series), map);
    }

    pub fn add_instance(&mut self, series: &str, id: &str, uncompressed_size: u64) {
        self.register(Some(series), id, ResourceLevel::Instance);
        self.attachments.insert(id.to_string(), uncompressed_size);
    }
}

impl Catalog for FixtureCatalog {
    fn lookup_level(&self, public_id: &str) -> Option<ResourceLevel> {
        self.levels.get(public_id).copied()
    }

    fn lookup_parent(&self, public_id: &str) -> Option<String> {
        self.parents.get(public_id).cloned()
    }

    fn children(&self, public_id: &str) -> Vec<String> {
        self.children.get(public_id).cloned().unwrap_or_default()
    }

    fn main_dicom_tags(&self, public_id: &str, level: ResourceLevel) -> Option<TagMap> {
        self.tags.get(&(public_id.to_string(), level)).cloned()
    }

    fn lookup_attachment(&self, instance_id: &str) -> Option<AttachmentInfo> {
        if self.dropped_attachments.contains(instance_id) {
            return None;
        }
        self.attachments
            .get(instance_id)
            .map(|&uncompressed_size| AttachmentInfo {
                uncompressed_size,
                revision: 1,
            })
    }
}

// ---------------------------------------------------------------------------
// Blob store fixture
// ---------------------------------------------------------------------------

/// In-memory blob store with optional per-instance latency and scripted
/// failures.
#[derive(Default)]
pub struct FixtureBlobStore {
    payloads: HashMap<String, Vec<u8>>,
    delays_ms: HashMap<String, u64>,
    pub missing: HashSet<String>,
    pub transient: HashSet<String>,
    reads: Mutex<Vec<String>>,
}

impl FixtureBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, payload: &[u8]) {
        self.payloads.insert(id.to_string(), payload.to_vec());
    }

    pub fn set_delay_ms(&mut self, id: &str, delay: u64) {
        self.delays_ms.insert(id.to_string(), delay);
    }

    /// Instance identifiers in the order their reads were issued.
    pub fn read_log(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

impl BlobStore for FixtureBlobStore {
    fn read_dicom(&self, instance_id: &str) -> Result<Vec<u8>, BlobFetchError> {
        self.reads.lock().unwrap().push(instance_id.to_string());
        if let Some(delay) = self.delays_ms.get(instance_id) {
            std::thread::sleep(Duration::from_millis(*delay));
        }
        if self.missing.contains(instance_id) {
            return Err(BlobFetchError::NotFound);
        }
        if self.transient.contains(instance_id) {
            return Err(BlobFetchError::Transient("storage offline".into()));
        }
        self.payloads
            .get(instance_id)
            .cloned()
            .ok_or(BlobFetchError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Transcoder fixtures
// ---------------------------------------------------------------------------

/// Transcoder that supports nothing; every instance falls back to its
/// original bytes.
pub struct NoTranscoder;

impl Transcoder for NoTranscoder {
    fn transcode(
        &self,
        _source: &[u8],
        _accepted: &BTreeSet<TransferSyntax>,
        _allow_new_sop_instance_uid: bool,
    ) -> Option<Transcoded> {
        None
    }
}

/// Transcoder that prefixes payloads with `TX:`, refusing the payloads it
/// was told to refuse.
pub struct MarkingTranscoder {
    pub refuse: HashSet<Vec<u8>>,
}

impl MarkingTranscoder {
    pub fn new() -> Self {
        Self {
            refuse: HashSet::new(),
        }
    }
}

impl Transcoder for MarkingTranscoder {
    fn transcode(
        &self,
        source: &[u8],
        _accepted: &BTreeSet<TransferSyntax>,
        _allow_new_sop_instance_uid: bool,
    ) -> Option<Transcoded> {
        if self.refuse.contains(source) {
            return None;
        }
        let mut bytes = b"TX:".to_vec();
        bytes.extend_from_slice(source);
        Some(Transcoded {
            parsed: ParsedInstance::from_bytes(bytes.clone()),
            bytes,
        })
    }
}

// ---------------------------------------------------------------------------
// DICOMDIR index fixture
// ---------------------------------------------------------------------------

/// What a [`RecordingDirIndex`] observed.
#[derive(Default)]
pub struct DirIndexLog {
    pub entries: Vec<(String, String, usize)>,
    pub extended_sop_class: bool,
}

/// DICOMDIR index that records every added file and encodes a synthetic
/// listing.
pub struct RecordingDirIndex {
    log: Arc<Mutex<DirIndexLog>>,
}

impl RecordingDirIndex {
    pub fn new() -> (Self, Arc<Mutex<DirIndexLog>>) {
        let log = Arc::new(Mutex::new(DirIndexLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl DirIndex for RecordingDirIndex {
    fn enable_extended_sop_class(&mut self, enabled: bool) {
        self.log.lock().unwrap().extended_sop_class = enabled;
    }

    fn add(&mut self, folder: &str, filename: &str, instance: &ParsedInstance) -> medizip::Result<()> {
        self.log.lock().unwrap().entries.push((
            folder.to_string(),
            filename.to_string(),
            instance.len(),
        ));
        Ok(())
    }

    fn encode(&self) -> medizip::Result<Vec<u8>> {
        let log = self.log.lock().unwrap();
        let mut listing = String::from("DICOMDIR\n");
        for (folder, filename, _) in &log.entries {
            listing.push_str(&format!("{}/{}\n", folder, filename));
        }
        Ok(listing.into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Output stream fixture
// ---------------------------------------------------------------------------

/// Stream collecting the delivered archive into a shared buffer.
pub struct RecordingStream {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub cancelled: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
}

impl RecordingStream {
    /// Returns the stream plus handles to observe it after the job takes
    /// ownership.
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                data: Arc::clone(&data),
                cancelled: Arc::clone(&cancelled),
                closed: Arc::clone(&closed),
            },
            data,
            cancelled,
            closed,
        )
    }
}

impl OutputStream for RecordingStream {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.data.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Context assembly
// ---------------------------------------------------------------------------

/// Bundles fixtures into an [`ArchiveContext`].
pub fn context_of(
    catalog: FixtureCatalog,
    blobs: FixtureBlobStore,
    transcoder: impl Transcoder + 'static,
) -> (ArchiveContext, Arc<FixtureBlobStore>) {
    let blobs = Arc::new(blobs);
    let context = ArchiveContext {
        catalog: Arc::new(catalog),
        blob_store: Arc::clone(&blobs) as Arc<dyn BlobStore>,
        transcoder: Arc::new(transcoder),
        media_archive: Arc::new(MediaArchive::default()),
    };
    (context, blobs)
}

// ---------------------------------------------------------------------------
// ZIP inspection
// ---------------------------------------------------------------------------

/// One entry parsed back out of a produced archive.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Returns `true` if the archive carries the ZIP64 end records.
pub fn zip_is_zip64(bytes: &[u8]) -> bool {
    let eocd = bytes.len() - 22;
    assert_eq!(read_u32(bytes, eocd), 0x0605_4b50, "missing end record");
    eocd >= 20 && read_u32(bytes, eocd - 20) == 0x0706_4b50
}

/// Parses the central directory of a produced archive.
pub fn zip_entries(bytes: &[u8]) -> Vec<ZipEntry> {
    let eocd = bytes.len() - 22;
    assert_eq!(read_u32(bytes, eocd), 0x0605_4b50, "missing end record");

    let (mut at, count) = if zip_is_zip64(bytes) {
        let locator = eocd - 20;
        let zip64_eocd = read_u64(bytes, locator + 8) as usize;
        assert_eq!(read_u32(bytes, zip64_eocd), 0x0606_4b50);
        (
            read_u64(bytes, zip64_eocd + 48) as usize,
            read_u64(bytes, zip64_eocd + 32),
        )
    } else {
        (read_u32(bytes, eocd + 16) as usize, read_u16(bytes, eocd + 10) as u64)
    };

    let mut entries = Vec::new();
    for _ in 0..count {
        assert_eq!(read_u32(bytes, at), 0x0201_4b50, "bad central header");
        let method = read_u16(bytes, at + 10);
        let mut compressed_size = read_u32(bytes, at + 20) as u64;
        let mut uncompressed_size = read_u32(bytes, at + 24) as u64;
        let name_len = read_u16(bytes, at + 28) as usize;
        let extra_len = read_u16(bytes, at + 30) as usize;
        let comment_len = read_u16(bytes, at + 32) as usize;
        let mut local_header_offset = read_u32(bytes, at + 42) as u64;
        let name = String::from_utf8(bytes[at + 46..at + 46 + name_len].to_vec()).unwrap();

        // Resolve deferred ZIP64 fields from the extra record
        let mut extra_at = at + 46 + name_len;
        let extra_end = extra_at + extra_len;
        while extra_at + 4 <= extra_end {
            let id = read_u16(bytes, extra_at);
            let size = read_u16(bytes, extra_at + 2) as usize;
            if id == 0x0001 {
                let mut field = extra_at + 4;
                if uncompressed_size == u32::MAX as u64 {
                    uncompressed_size = read_u64(bytes, field);
                }
                field += 8;
                if compressed_size == u32::MAX as u64 {
                    compressed_size = read_u64(bytes, field);
                }
                field += 8;
                if local_header_offset == u32::MAX as u64 {
                    local_header_offset = read_u64(bytes, field);
                }
            }
            extra_at += 4 + size;
        }

        entries.push(ZipEntry {
            name,
            method,
            compressed_size,
            uncompressed_size,
            local_header_offset,
        });
        at = at + 46 + name_len + extra_len + comment_len;
    }
    entries
}

/// Entry names in central directory order (which is write order).
pub fn zip_entry_names(bytes: &[u8]) -> Vec<String> {
    zip_entries(bytes).into_iter().map(|e| e.name).collect()
}

/// Extracts and decompresses the payload of one entry.
pub fn zip_entry_data(bytes: &[u8], name: &str) -> Vec<u8> {
    let entry = zip_entries(bytes)
        .into_iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("entry '{}' not found in archive", name));

    let at = entry.local_header_offset as usize;
    assert_eq!(read_u32(bytes, at), 0x0403_4b50, "bad local header");
    let name_len = read_u16(bytes, at + 26) as usize;
    let extra_len = read_u16(bytes, at + 28) as usize;
    let start = at + 30 + name_len + extra_len;
    let compressed = &bytes[start..start + entry.compressed_size as usize];

    match entry.method {
        0 => compressed.to_vec(),
        8 => {
            let mut decoder = flate2::read::DeflateDecoder::new(compressed);
            let mut data = Vec::new();
            decoder.read_to_end(&mut data).unwrap();
            data
        }
        other => panic!("unexpected compression method {}", other),
    }
}
