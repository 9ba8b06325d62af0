//! Collects every effect pack under the configured search roots into the
//! ordered list the gallery navigates.
//!
//! Roots are scanned in precedence order; when two roots contain a pack with
//! the same directory name the earlier root wins. Packs that fail to load are
//! logged and skipped so one broken manifest never hides the rest of the
//! catalog.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::descriptor::{EffectDescriptor, SortRank};
use crate::pack::{EffectPack, MANIFEST_FILE};

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    descriptor: Arc<EffectDescriptor>,
    failed: bool,
}

impl CatalogEntry {
    pub fn descriptor(&self) -> &Arc<EffectDescriptor> {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn rank(&self) -> SortRank {
        if self.failed {
            SortRank::Failed
        } else {
            self.descriptor.sort
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = EffectDescriptor>) -> Self {
        let mut catalog = Self {
            entries: descriptors
                .into_iter()
                .map(|descriptor| CatalogEntry {
                    failed: matches!(descriptor.sort, SortRank::Failed),
                    descriptor: Arc::new(descriptor),
                })
                .collect(),
        };
        catalog.sort();
        catalog
    }

    pub fn discover(roots: &[PathBuf]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();
        for root in roots {
            if !root.is_dir() {
                debug!(root = %root.display(), "effect root missing; skipping");
                continue;
            }
            for pack_dir in pack_directories(root)? {
                let Some(name) = pack_dir.file_name().map(|name| name.to_os_string()) else {
                    continue;
                };
                if !seen.insert(name) {
                    debug!(path = %pack_dir.display(), "effect shadowed by an earlier root");
                    continue;
                }
                match EffectPack::load(&pack_dir).and_then(|pack| pack.descriptor()) {
                    Ok(descriptor) => {
                        debug!(
                            id = %descriptor.id,
                            name = %descriptor.name,
                            buffers = descriptor.buffer_count(),
                            "loaded effect pack"
                        );
                        descriptors.push(descriptor);
                    }
                    Err(err) => {
                        warn!(path = %pack_dir.display(), error = %err, "skipping invalid effect pack");
                    }
                }
            }
        }
        Ok(Self::from_descriptors(descriptors))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == id)
    }

    /// Marks an effect as failed and moves it to the end of the list.
    ///
    /// Returns `false` when no effect with the id exists or it was already
    /// marked, in which case the order is unchanged.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.id() == id) else {
            return false;
        };
        if entry.failed {
            return false;
        }
        entry.failed = true;
        self.sort();
        true
    }

    /// Ids of the entries before and after `id` in the current order.
    pub fn neighbours(&self, id: &str) -> Option<(String, String)> {
        let index = self.position(id)?;
        let previous = self.entries[self.previous_index(index)].id().to_string();
        let next = self.entries[self.next_index(index)].id().to_string();
        Some((previous, next))
    }

    /// Index after `index`, wrapping around.
    pub fn next_index(&self, index: usize) -> usize {
        if self.entries.is_empty() {
            0
        } else {
            (index + 1) % self.entries.len()
        }
    }

    /// Index before `index`, wrapping around.
    pub fn previous_index(&self, index: usize) -> usize {
        if self.entries.is_empty() {
            0
        } else {
            (index + self.entries.len() - 1) % self.entries.len()
        }
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            a.rank()
                .cmp(&b.rank())
                .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
                .then_with(|| a.id().cmp(b.id()))
        });
    }
}

fn pack_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let entries = fs::read_dir(root)
        .with_context(|| format!("failed to read effect root {}", root.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() && path.join(MANIFEST_FILE).exists() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
