//! Lazy hierarchical set of selected resources.
//!
//! An [`ArchiveTree`] accumulates an arbitrary mix of selections (whole
//! patients, single instances, anything in between) and expands them
//! against the catalog exactly once, just before planning. Until then a
//! selected subtree is only a [`Pending`] marker; expansion replaces each
//! marker by the concrete children the catalog reports at that moment.
//!
//! Merging rules:
//!
//! - adding the same selection twice is a no-op;
//! - adding a finer selection under a pending coarser one is a no-op (the
//!   coarser expansion already covers it);
//! - adding a coarser selection over previously added finer ones marks the
//!   whole subtree pending, superseding the finer view.
//!
//! [`Pending`]: Subtree::Pending

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::hierarchy::{ResourceLevel, ResourcePath};
use crate::{Error, Result};

/// Receives the expanded tree in traversal order.
///
/// Internal levels are visited pre-order: `open` before the children,
/// `close` after. Instance leaves arrive through `add_instance` with no
/// surrounding open/close pair.
pub trait TreeVisitor {
    /// Enters an internal node.
    fn open(&mut self, level: ResourceLevel, public_id: &str) -> Result<()>;

    /// Leaves the most recently opened node.
    fn close(&mut self) -> Result<()>;

    /// Visits one instance leaf.
    fn add_instance(&mut self, instance_id: &str, uncompressed_size: u64) -> Result<()>;
}

/// A child entry: either still to be expanded against the catalog, or an
/// already concrete subtree.
enum Subtree {
    Pending,
    Expanded(Box<ArchiveTree>),
}

/// The tree of selected resources, rooted at the patient level.
pub struct ArchiveTree {
    level: ResourceLevel,
    /// Child entries at patient/study/series level, in identifier order.
    children: BTreeMap<String, Subtree>,
    /// Instance leaves `(id, uncompressed size)` in catalog order,
    /// deduplicated by identifier. Only at instance level.
    instances: Vec<(String, u64)>,
}

impl ArchiveTree {
    /// Creates an empty tree rooted at `level`.
    pub fn new(level: ResourceLevel) -> Self {
        Self {
            level,
            children: BTreeMap::new(),
            instances: Vec::new(),
        }
    }

    /// The level of this node's entries.
    pub fn level(&self) -> ResourceLevel {
        self.level
    }

    /// Returns `true` if nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.instances.is_empty()
    }

    /// Merges one resolved selection into the tree.
    pub fn add(&mut self, catalog: &dyn Catalog, path: &ResourcePath) -> Result<()> {
        let id = path.identifier(self.level)?;

        if self.level == ResourceLevel::Instance {
            self.add_for_expansion(catalog, id);
        } else if path.level() == self.level {
            // Mark for full expansion, superseding any finer view
            self.children.insert(id.to_string(), Subtree::Pending);
        } else if !self.children.contains_key(id) {
            // First time this resource is met
            let child_level = self
                .level
                .child()
                .ok_or(Error::Internal("instance level cannot have children"))?;
            let mut child = ArchiveTree::new(child_level);
            child.add(catalog, path)?;
            self.children
                .insert(id.to_string(), Subtree::Expanded(Box::new(child)));
        } else if let Some(Subtree::Expanded(child)) = self.children.get_mut(id) {
            child.add(catalog, path)?;
        }
        // A pending entry is already marked for full expansion; the finer
        // selection is covered by it

        Ok(())
    }

    /// Registers a child reported by the catalog (or selected directly, at
    /// the instance level).
    fn add_for_expansion(&mut self, catalog: &dyn Catalog, id: &str) {
        if self.level == ResourceLevel::Instance {
            if self.instances.iter().any(|(existing, _)| existing == id) {
                return;
            }
            // An instance whose attachment is gone was deleted between
            // selection and expansion: drop it silently
            if let Some(attachment) = catalog.lookup_attachment(id) {
                self.instances
                    .push((id.to_string(), attachment.uncompressed_size));
            }
        } else {
            self.children.insert(id.to_string(), Subtree::Pending);
        }
    }

    /// Expands every pending entry against the catalog, depth-first.
    ///
    /// Idempotent: already expanded subtrees are traversed but not
    /// re-queried.
    pub fn expand(&mut self, catalog: &dyn Catalog) {
        let child_level = match self.level.child() {
            Some(level) => level,
            None => return,
        };

        for (id, subtree) in self.children.iter_mut() {
            if matches!(subtree, Subtree::Pending) {
                let mut child = ArchiveTree::new(child_level);
                for child_id in catalog.children(id) {
                    child.add_for_expansion(catalog, &child_id);
                }
                *subtree = Subtree::Expanded(Box::new(child));
            }

            if let Subtree::Expanded(child) = subtree {
                child.expand(catalog);
            }
        }
    }

    /// Walks the expanded tree: internal entries in identifier order,
    /// instance leaves in catalog order.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] if any entry is still pending; call
    /// [`expand`](Self::expand) first.
    pub fn visit(&self, visitor: &mut dyn TreeVisitor) -> Result<()> {
        if self.level == ResourceLevel::Instance {
            for (id, size) in &self.instances {
                visitor.add_instance(id, *size)?;
            }
        } else {
            for (id, subtree) in &self.children {
                let child = match subtree {
                    Subtree::Expanded(child) => child,
                    Subtree::Pending => {
                        return Err(Error::Internal("selection tree visited before expansion"))
                    }
                };
                visitor.open(self.level, id)?;
                child.visit(visitor)?;
                visitor.close()?;
            }
        }
        Ok(())
    }
}
