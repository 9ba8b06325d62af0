//! Wraps an effect pack directory so the catalog can load manifests, read the
//! referenced GLSL sources, and resolve asset paths consistently.
//!
//! Types:
//!
//! - `PackError` classifies manifest parsing, validation, and I/O failures.
//! - `EffectPack` stores the pack root and parsed `EffectManifest`.
//!
//! Functions:
//!
//! - `EffectPack::load` reads `effect.toml` and validates it.
//! - `EffectPack::descriptor` reads every GLSL file the manifest references
//!   and lowers channel entries into `ChannelDescriptor` variants.
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::descriptor::{
    ChannelDescriptor, ChannelKind, CustomUniform, EffectDescriptor, SortRank,
};
use crate::manifest::{ChannelEntry, EffectManifest};

pub const MANIFEST_FILE: &str = "effect.toml";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("manifest validation failed: {0:?}")]
    ManifestValidation(Vec<String>),

    #[error("failed to read shader source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct EffectPack {
    root: PathBuf,
    manifest: EffectManifest,
}

impl EffectPack {
    pub fn load(root: impl AsRef<Path>) -> Result<Self, PackError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(PackError::ManifestMissing(manifest_path));
        }

        let manifest_raw = fs::read_to_string(&manifest_path)?;
        let manifest: EffectManifest = toml::from_str(&manifest_raw)?;
        let issues = manifest.validate();
        if !issues.is_empty() {
            return Err(PackError::ManifestValidation(issues));
        }

        Ok(Self { root, manifest })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn manifest(&self) -> &EffectManifest {
        &self.manifest
    }

    /// Directory name used as the effect's stable identifier.
    pub fn id(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.manifest.name.clone())
    }

    pub fn descriptor(&self) -> Result<EffectDescriptor, PackError> {
        let manifest = &self.manifest;
        let fragment = self.read_source(&manifest.fragment)?;
        let common = manifest
            .common
            .as_ref()
            .map(|path| self.read_source(path))
            .transpose()?;
        let channels = self.lower_channels(&manifest.channels)?;
        let custom_uniforms = manifest
            .uniforms
            .iter()
            .map(|entry| {
                let mut value = [0.0; 4];
                for (slot, component) in value.iter_mut().zip(&entry.value) {
                    *slot = *component;
                }
                CustomUniform {
                    name: entry.name.clone(),
                    value,
                }
            })
            .collect();

        Ok(EffectDescriptor {
            id: self.id(),
            key: manifest.key.clone(),
            name: manifest.name.clone(),
            description: manifest
                .description
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            tags: manifest.tags.clone(),
            sort: manifest
                .sort
                .map(SortRank::Ranked)
                .unwrap_or(SortRank::Unranked),
            gl_version: manifest.gl_version().unwrap_or_default(),
            common,
            precision: manifest.precision.clone(),
            fragment,
            channels,
            custom_uniforms,
            root: self.root.clone(),
        })
    }

    fn lower_channels(&self, entries: &[ChannelEntry]) -> Result<Vec<ChannelDescriptor>, PackError> {
        let mut channels = Vec::with_capacity(entries.len());
        for entry in entries {
            let slot = usize::from(entry.slot);
            // Validation already rejected unknown codes and missing fields.
            let Ok(kind) = ChannelKind::try_from(entry.kind) else {
                continue;
            };
            let channel = match kind {
                ChannelKind::StaticImage => ChannelDescriptor::StaticImage {
                    slot,
                    path: self.root.join(entry.path.clone().unwrap_or_default()),
                },
                ChannelKind::BufferShader => {
                    let fragment = match &entry.fragment {
                        Some(path) => self.read_source(path)?,
                        None => String::new(),
                    };
                    let nested = entry
                        .channels
                        .as_ref()
                        .map(|nested| self.lower_channels(nested))
                        .transpose()?;
                    ChannelDescriptor::BufferShader {
                        slot,
                        fragment,
                        channels: nested,
                    }
                }
                ChannelKind::Video => ChannelDescriptor::Video {
                    slot,
                    source: entry.source.clone().unwrap_or_default(),
                },
                ChannelKind::AudioViz => ChannelDescriptor::AudioViz { slot },
            };
            channels.push(channel);
        }
        Ok(channels)
    }

    fn read_source(&self, relative: &Path) -> Result<String, PackError> {
        let path = self.root.join(relative);
        fs::read_to_string(&path).map_err(|source| PackError::Source { path, source })
    }
}
