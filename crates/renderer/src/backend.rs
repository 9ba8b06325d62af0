//! The seam between the render graph and the GPU.
//!
//! Everything above this trait (channel resolution, the pass scheduler, the
//! session lifecycle) talks to the GPU only through [`GpuBackend`] and opaque
//! handles. [`crate::gpu::WgpuBackend`] is the real implementation; tests use
//! a recording backend that tracks allocations and draw calls.
use effects::GlVersion;
use thiserror::Error;

use crate::compile::{ProgramSource, ShaderCompileError};
use crate::types::CHANNEL_COUNT;
use crate::uniforms::ShadertoyUniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Where a program's output goes; fixed when the program is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Surface,
    Offscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutput {
    Surface,
    Target(TargetId),
}

/// What one `iChannelN` samples during a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelTexture {
    /// Transparent 1x1 placeholder.
    #[default]
    Unbound,
    Texture(TextureId),
    /// The target's published contents from the previous frame.
    Target(TargetId),
}

/// Tightly packed RGBA8 pixels, bottom row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ChannelImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let texels = (width as usize) * (height as usize);
        Self::new(width, height, rgba.repeat(texels))
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// One full-screen draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawPass<'a> {
    pub program: ProgramId,
    pub output: PassOutput,
    pub uniforms: &'a ShadertoyUniforms,
    pub channels: [ChannelTexture; CHANNEL_COUNT],
}

/// Live GPU objects owned through a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub programs: usize,
    pub targets: usize,
    pub textures: usize,
}

impl ResourceCounts {
    pub fn is_empty(&self) -> bool {
        self.programs == 0 && self.targets == 0 && self.textures == 0
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("render target {width}x{height} exceeds the device limit of {limit}")]
    TargetTooLarge { width: u32, height: u32, limit: u32 },

    #[error("render target must have a non-zero size")]
    EmptyTarget,

    #[error("texture upload rejected: {0}")]
    InvalidImage(String),
}

pub trait GpuBackend {
    fn create_program(
        &mut self,
        version: GlVersion,
        source: &ProgramSource<'_>,
        output: OutputKind,
    ) -> Result<ProgramId, ShaderCompileError>;

    fn destroy_program(&mut self, program: ProgramId);

    /// Allocates a cleared render target with a published snapshot.
    fn create_target(&mut self, size: (u32, u32)) -> Result<TargetId, BackendError>;

    fn destroy_target(&mut self, target: TargetId);

    fn create_texture(&mut self, image: &ChannelImage) -> Result<TextureId, BackendError>;

    /// Replaces a texture's contents, reallocating when the size changed.
    fn update_texture(&mut self, texture: TextureId, image: &ChannelImage)
        -> Result<(), BackendError>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, size: (u32, u32));

    /// Acquires the next surface image and opens the frame's command stream.
    fn begin_frame(&mut self) -> Result<(), wgpu::SurfaceError>;

    fn draw(&mut self, pass: DrawPass<'_>);

    /// Publishes every target's contents for the next frame, submits and
    /// presents.
    fn end_frame(&mut self);

    fn live_resources(&self) -> ResourceCounts;
}
