//! The four-level DICOM resource hierarchy.
//!
//! Every stored resource lives at one of four levels, ordered from coarse
//! to fine: patient, study, series, instance. A [`ResourcePath`] pins one
//! selected resource together with all of its parents, resolved against
//! the catalog at selection time.

use std::fmt;

use crate::catalog::Catalog;
use crate::{Error, Result};

/// One level of the DICOM hierarchy, `Patient < Study < Series < Instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceLevel {
    /// The patient level (coarsest).
    Patient,
    /// The study level.
    Study,
    /// The series level.
    Series,
    /// The instance level (one DICOM file; finest).
    Instance,
}

impl ResourceLevel {
    /// Returns the next finer level, or `None` at the instance level.
    pub fn child(self) -> Option<ResourceLevel> {
        match self {
            ResourceLevel::Patient => Some(ResourceLevel::Study),
            ResourceLevel::Study => Some(ResourceLevel::Series),
            ResourceLevel::Series => Some(ResourceLevel::Instance),
            ResourceLevel::Instance => None,
        }
    }

    /// Returns the next coarser level, or `None` at the patient level.
    pub fn parent(self) -> Option<ResourceLevel> {
        match self {
            ResourceLevel::Patient => None,
            ResourceLevel::Study => Some(ResourceLevel::Patient),
            ResourceLevel::Series => Some(ResourceLevel::Study),
            ResourceLevel::Instance => Some(ResourceLevel::Series),
        }
    }

    /// Display name, also used for `"Unknown <level>"` directory fallbacks.
    pub fn name(self) -> &'static str {
        match self {
            ResourceLevel::Patient => "Patient",
            ResourceLevel::Study => "Study",
            ResourceLevel::Series => "Series",
            ResourceLevel::Instance => "Instance",
        }
    }

    fn index(self) -> usize {
        match self {
            ResourceLevel::Patient => 0,
            ResourceLevel::Study => 1,
            ResourceLevel::Series => 2,
            ResourceLevel::Instance => 3,
        }
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A selected resource with every ancestor identifier resolved.
///
/// For a selection at level `L`, the path holds the identifier at `L` and
/// at every level above it; `identifier` is defined exactly for those
/// levels. Paths are immutable after construction.
#[derive(Debug, Clone)]
pub struct ResourcePath {
    level: ResourceLevel,
    identifiers: [Option<String>; 4],
}

impl ResourcePath {
    /// Resolves a public identifier against the catalog.
    ///
    /// The level of `public_id` is looked up, then every parent up to the
    /// patient level is resolved through [`Catalog::lookup_parent`].
    ///
    /// # Errors
    ///
    /// [`Error::UnknownResource`] if the identifier or any required parent
    /// is absent from the catalog.
    pub fn resolve(catalog: &dyn Catalog, public_id: &str) -> Result<Self> {
        let level = catalog
            .lookup_level(public_id)
            .ok_or_else(|| Error::UnknownResource {
                id: public_id.to_string(),
            })?;

        let mut identifiers: [Option<String>; 4] = Default::default();
        let mut current = public_id.to_string();
        let mut at = level;

        loop {
            identifiers[at.index()] = Some(current.clone());
            match at.parent() {
                Some(parent_level) => {
                    current = catalog
                        .lookup_parent(&current)
                        .ok_or_else(|| Error::UnknownResource {
                            id: current.clone(),
                        })?;
                    at = parent_level;
                }
                None => break,
            }
        }

        Ok(Self { level, identifiers })
    }

    /// The level of the original selection.
    pub fn level(&self) -> ResourceLevel {
        self.level
    }

    /// The identifier at `level`, defined for every level at or above the
    /// selection level.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when asked for a level finer than the selection.
    pub fn identifier(&self, level: ResourceLevel) -> Result<&str> {
        self.identifiers[level.index()]
            .as_deref()
            .ok_or(Error::Internal(
                "resource path queried below its selection level",
            ))
    }
}
