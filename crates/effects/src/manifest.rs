//! Defines the on-disk `effect.toml` schema. The manifest mirrors the effect
//! module contract (name, optional key and rank, GL version, common code,
//! precision, main body, channels and custom uniforms) using file references
//! instead of inline GLSL; `pack` reads the referenced files and lowers the
//! manifest into an `EffectDescriptor`.
//!
//! Channels keep the external numeric encoding (`type = 0..3`) so packs can be
//! written by hand; the codes are converted into `ChannelDescriptor` variants
//! during loading and never travel further than this crate.
use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::{ChannelKind, GlVersion, CHANNEL_SLOTS};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EffectManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<i32>,
    #[serde(default = "default_webgl")]
    pub webgl: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common: Option<PathBuf>,
    pub fragment: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub uniforms: Vec<UniformEntry>,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

fn default_webgl() -> u8 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChannelEntry {
    pub slot: u8,
    #[serde(rename = "type")]
    pub kind: u8,
    /// Image path (type 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Buffer fragment body (type 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<PathBuf>,
    /// Registered video source name (type 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Own channel table of a buffer (type 1); absent means "share the parent's".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelEntry>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UniformEntry {
    pub name: String,
    #[serde(default)]
    pub value: Vec<f32>,
}

impl EffectManifest {
    pub fn gl_version(&self) -> Option<GlVersion> {
        GlVersion::from_number(self.webgl)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push("effect name must not be empty".to_string());
        }
        if self.gl_version().is_none() {
            issues.push(format!(
                "webgl version {} is not supported (expected 1 or 2)",
                self.webgl
            ));
        }
        validate_channel_table(&self.channels, "effect", &mut issues);

        let mut seen = HashSet::new();
        for uniform in &self.uniforms {
            if !is_identifier(&uniform.name) {
                issues.push(format!(
                    "custom uniform '{}' is not a valid GLSL identifier",
                    uniform.name
                ));
            }
            if !seen.insert(uniform.name.as_str()) {
                issues.push(format!("custom uniform '{}' declared twice", uniform.name));
            }
            if uniform.value.len() > 4 {
                issues.push(format!(
                    "custom uniform '{}' has {} components; at most 4 are supported",
                    uniform.name,
                    uniform.value.len()
                ));
            }
        }
        issues
    }
}

fn validate_channel_table(entries: &[ChannelEntry], owner: &str, issues: &mut Vec<String>) {
    let mut slots = HashSet::new();
    for entry in entries {
        if usize::from(entry.slot) >= CHANNEL_SLOTS {
            issues.push(format!(
                "{owner} uses channel {} which exceeds the ShaderToy limit",
                entry.slot
            ));
        }
        if !slots.insert(entry.slot) {
            issues.push(format!("{owner} binds channel {} twice", entry.slot));
        }

        let kind = match ChannelKind::try_from(entry.kind) {
            Ok(kind) => kind,
            Err(err) => {
                issues.push(format!("{owner} channel {}: {err}", entry.slot));
                continue;
            }
        };

        match kind {
            ChannelKind::StaticImage if entry.path.is_none() => {
                issues.push(format!("{owner} channel {} (image) needs a path", entry.slot));
            }
            ChannelKind::BufferShader => {
                if entry.fragment.is_none() {
                    issues.push(format!(
                        "{owner} channel {} (buffer) needs a fragment",
                        entry.slot
                    ));
                }
                if let Some(nested) = &entry.channels {
                    let nested_owner = format!("{owner} buffer {}", entry.slot);
                    validate_channel_table(nested, &nested_owner, issues);
                }
            }
            ChannelKind::Video if entry.source.is_none() => {
                issues.push(format!("{owner} channel {} (video) needs a source", entry.slot));
            }
            _ => {}
        }

        if kind != ChannelKind::BufferShader && entry.channels.is_some() {
            issues.push(format!(
                "{owner} channel {} ({kind}) cannot declare nested channels",
                entry.slot
            ));
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
