//! Planning of ZIP operations from an expanded selection tree.
//!
//! Two layouts are supported. The *archive* layout mirrors the DICOM
//! hierarchy with human-readable directory names built from main DICOM
//! tags, and instance files named by modality prefix and a per-series
//! counter. The *media* layout flattens everything into a single `IMAGES/`
//! directory with DICOM-legal 8-character names, leaving room for the
//! `DICOMDIR` entry the writer appends at the end.

use crate::catalog::Catalog;
use crate::commands::CommandStream;
use crate::dicom::{tags, DicomTag, TagMap};
use crate::hierarchy::ResourceLevel;
use crate::selection::{ArchiveTree, TreeVisitor};
use crate::{Error, Result};

/// The flat directory holding every instance of a media archive.
pub const MEDIA_IMAGES_FOLDER: &str = "IMAGES";

/// Emits the archive layout for an expanded tree.
///
/// # Errors
///
/// [`Error::BadSequenceOfCalls`] unless `commands` is empty on entry.
pub fn plan_archive_layout(
    tree: &ArchiveTree,
    catalog: &dyn Catalog,
    commands: &mut CommandStream,
) -> Result<()> {
    ensure_empty(commands)?;
    let mut visitor = ArchiveLayoutVisitor::new(commands, catalog);
    tree.visit(&mut visitor)
}

/// Emits the media layout for an expanded tree.
///
/// # Errors
///
/// [`Error::BadSequenceOfCalls`] unless `commands` is empty on entry.
pub fn plan_media_layout(tree: &ArchiveTree, commands: &mut CommandStream) -> Result<()> {
    ensure_empty(commands)?;
    commands.push_open_directory(MEDIA_IMAGES_FOLDER)?;
    {
        let mut visitor = MediaLayoutVisitor::new(commands);
        tree.visit(&mut visitor)?;
    }
    commands.push_close_directory()
}

fn ensure_empty(commands: &CommandStream) -> Result<()> {
    if commands.is_empty() {
        Ok(())
    } else {
        Err(Error::BadSequenceOfCalls(
            "planning requires an empty command stream",
        ))
    }
}

/// Instance file naming scheme of one series: an uppercased modality
/// prefix of at most two characters, zero-padded counter digits filling
/// the name up to eight characters, and the `.dcm` suffix.
struct InstanceNameFormat {
    prefix: String,
    digits: usize,
}

impl InstanceNameFormat {
    fn from_modality(modality: &str) -> Self {
        let prefix: String = modality
            .chars()
            .take(2)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self {
            digits: 8 - prefix.len(),
            prefix,
        }
    }

    fn render(&self, counter: u32) -> String {
        format!(
            "{}{:0width$}.dcm",
            self.prefix,
            counter,
            width = self.digits
        )
    }
}

impl Default for InstanceNameFormat {
    fn default() -> Self {
        Self::from_modality("")
    }
}

fn tag_value(tags: &TagMap, tag: DicomTag) -> String {
    tags.get(&tag).cloned().unwrap_or_default()
}

/// Strips surrounding whitespace and downgrades to printable 7-bit ASCII.
fn sanitize_entry_name(raw: &str) -> String {
    let ascii: String = raw
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect();
    ascii.trim().to_string()
}

struct ArchiveLayoutVisitor<'a> {
    commands: &'a mut CommandStream,
    catalog: &'a dyn Catalog,
    format: InstanceNameFormat,
    counter: u32,
}

impl<'a> ArchiveLayoutVisitor<'a> {
    fn new(commands: &'a mut CommandStream, catalog: &'a dyn Catalog) -> Self {
        Self {
            commands,
            catalog,
            format: InstanceNameFormat::default(),
            counter: 0,
        }
    }
}

impl TreeVisitor for ArchiveLayoutVisitor<'_> {
    fn open(&mut self, level: ResourceLevel, public_id: &str) -> Result<()> {
        let resource_tags = self
            .catalog
            .main_dicom_tags(public_id, level)
            .unwrap_or_default();

        let name = match level {
            ResourceLevel::Patient => format!(
                "{} {}",
                tag_value(&resource_tags, tags::PATIENT_ID),
                tag_value(&resource_tags, tags::PATIENT_NAME)
            ),
            ResourceLevel::Study => format!(
                "{} {}",
                tag_value(&resource_tags, tags::ACCESSION_NUMBER),
                tag_value(&resource_tags, tags::STUDY_DESCRIPTION)
            ),
            ResourceLevel::Series => {
                let modality = tag_value(&resource_tags, tags::MODALITY);
                self.format = InstanceNameFormat::from_modality(&modality);
                self.counter = 0;
                format!(
                    "{} {}",
                    modality,
                    tag_value(&resource_tags, tags::SERIES_DESCRIPTION)
                )
            }
            ResourceLevel::Instance => {
                return Err(Error::Internal("instance level has no directory"))
            }
        };

        let mut name = sanitize_entry_name(&name);
        if name.is_empty() {
            name = format!("Unknown {}", level);
        }

        self.commands.push_open_directory(&name)
    }

    fn close(&mut self) -> Result<()> {
        self.commands.push_close_directory()
    }

    fn add_instance(&mut self, instance_id: &str, uncompressed_size: u64) -> Result<()> {
        let filename = self.format.render(self.counter);
        self.counter += 1;
        self.commands
            .push_write_instance(&filename, instance_id, uncompressed_size)
    }
}

struct MediaLayoutVisitor<'a> {
    commands: &'a mut CommandStream,
    counter: u32,
}

impl<'a> MediaLayoutVisitor<'a> {
    fn new(commands: &'a mut CommandStream) -> Self {
        Self {
            commands,
            counter: 0,
        }
    }
}

impl TreeVisitor for MediaLayoutVisitor<'_> {
    fn open(&mut self, _level: ResourceLevel, _public_id: &str) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_instance(&mut self, instance_id: &str, uncompressed_size: u64) -> Result<()> {
        // DICOM restricts filenames on interchange media to 8 characters
        let filename = format!("IM{}", self.counter);
        self.counter += 1;
        self.commands
            .push_write_instance(&filename, instance_id, uncompressed_size)
    }
}
