//! Effect descriptions consumed by the shaderdeck renderer.
//!
//! An effect is one selectable shader demo: a main fragment body plus any
//! auxiliary buffer passes, images, video or audio inputs it samples. Effects
//! live on disk as packs (a directory holding `effect.toml` and GLSL files);
//! `pack` turns a directory into an immutable [`EffectDescriptor`] and
//! `catalog` collects every pack under the search roots into a ranked list.

mod catalog;
mod descriptor;
mod manifest;
mod pack;

pub use catalog::{Catalog, CatalogEntry};
pub use descriptor::{
    ChannelDescriptor, ChannelKind, CustomUniform, EffectDescriptor, GlVersion, SortRank,
    UnknownChannelKind, CHANNEL_SLOTS, SHADERTOY_VIEW_URL,
};
pub use manifest::{ChannelEntry, EffectManifest, UniformEntry};
pub use pack::{EffectPack, PackError, MANIFEST_FILE};
