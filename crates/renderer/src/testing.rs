//! In-memory [`GpuBackend`] that records every call.
//!
//! Targets remember which frame last rendered into them and which frame's
//! contents are currently published, so tests can assert what a draw
//! actually sampled.
use std::collections::HashMap;

use effects::GlVersion;

use crate::backend::{
    BackendError, ChannelImage, ChannelTexture, DrawPass, GpuBackend, OutputKind, PassOutput,
    ProgramId, ResourceCounts, TargetId, TextureId,
};
use crate::compile::{build_fragment_source, ProgramSource, ProgramStage, ShaderCompileError};
use crate::types::CHANNEL_COUNT;
use crate::uniforms::ShadertoyUniforms;

#[derive(Debug, Clone)]
pub(crate) struct RecordedProgram {
    pub output: OutputKind,
    pub fragment: String,
}

#[derive(Debug, Clone, Copy)]
struct RecordedTarget {
    rendered: Option<u64>,
    published: Option<u64>,
}

/// What one channel slot delivered to a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sampled {
    Unbound,
    Texture(TextureId),
    /// A target's published contents, tagged with the frame that rendered
    /// them (`None` for the cleared initial state).
    Target(TargetId, Option<u64>),
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedDraw {
    pub frame: u64,
    pub program: ProgramId,
    pub output: PassOutput,
    pub uniforms: ShadertoyUniforms,
    pub sampled: [Sampled; CHANNEL_COUNT],
}

#[derive(Debug)]
pub(crate) struct RecordingBackend {
    next_id: u64,
    programs: HashMap<ProgramId, RecordedProgram>,
    targets: HashMap<TargetId, RecordedTarget>,
    textures: HashMap<TextureId, (u32, u32)>,
    pub draws: Vec<RecordedDraw>,
    pub frame: u64,
    in_frame: bool,
    surface: (u32, u32),
    /// Programs whose body contains this text fail to compile.
    pub fail_marker: Option<String>,
    /// Number of further targets that may be created before allocation fails.
    pub target_budget: Option<usize>,
    pub texture_uploads: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            programs: HashMap::new(),
            targets: HashMap::new(),
            textures: HashMap::new(),
            draws: Vec::new(),
            frame: 0,
            in_frame: false,
            surface: (0, 0),
            fail_marker: None,
            target_budget: None,
            texture_uploads: 0,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn program(&self, program: ProgramId) -> Option<&RecordedProgram> {
        self.programs.get(&program)
    }

    pub fn draws_in_frame(&self, frame: u64) -> Vec<&RecordedDraw> {
        self.draws.iter().filter(|draw| draw.frame == frame).collect()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GpuBackend for RecordingBackend {
    fn create_program(
        &mut self,
        version: GlVersion,
        source: &ProgramSource<'_>,
        output: OutputKind,
    ) -> Result<ProgramId, ShaderCompileError> {
        if let Some(marker) = &self.fail_marker {
            if source.body.contains(marker.as_str()) {
                return Err(ShaderCompileError::new(
                    ProgramStage::Fragment,
                    format!("rejected program containing '{marker}'"),
                ));
            }
        }
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            RecordedProgram {
                output,
                fragment: build_fragment_source(version, source),
            },
        );
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        assert!(
            self.programs.remove(&program).is_some(),
            "destroyed unknown program {program:?}"
        );
    }

    fn create_target(&mut self, size: (u32, u32)) -> Result<TargetId, BackendError> {
        if size.0 == 0 || size.1 == 0 {
            return Err(BackendError::EmptyTarget);
        }
        if let Some(budget) = self.target_budget.as_mut() {
            if *budget == 0 {
                return Err(BackendError::TargetTooLarge {
                    width: size.0,
                    height: size.1,
                    limit: 0,
                });
            }
            *budget -= 1;
        }
        let id = TargetId(self.next());
        self.targets.insert(
            id,
            RecordedTarget {
                rendered: None,
                published: None,
            },
        );
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        assert!(
            self.targets.remove(&target).is_some(),
            "destroyed unknown target {target:?}"
        );
    }

    fn create_texture(&mut self, image: &ChannelImage) -> Result<TextureId, BackendError> {
        if !image.is_valid() {
            return Err(BackendError::InvalidImage("bad pixel buffer".into()));
        }
        let id = TextureId(self.next());
        self.textures.insert(id, (image.width, image.height));
        self.texture_uploads += 1;
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, image: &ChannelImage) -> Result<(), BackendError> {
        let entry = self
            .textures
            .get_mut(&texture)
            .unwrap_or_else(|| panic!("updated unknown texture {texture:?}"));
        *entry = (image.width, image.height);
        self.texture_uploads += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        assert!(
            self.textures.remove(&texture).is_some(),
            "destroyed unknown texture {texture:?}"
        );
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn resize_surface(&mut self, size: (u32, u32)) {
        self.surface = size;
    }

    fn begin_frame(&mut self) -> Result<(), wgpu::SurfaceError> {
        assert!(!self.in_frame, "begin_frame called twice");
        self.in_frame = true;
        Ok(())
    }

    fn draw(&mut self, pass: DrawPass<'_>) {
        assert!(self.in_frame, "draw outside of a frame");
        let program = self
            .programs
            .get(&pass.program)
            .unwrap_or_else(|| panic!("draw with unknown program {:?}", pass.program));
        match pass.output {
            PassOutput::Surface => assert_eq!(program.output, OutputKind::Surface),
            PassOutput::Target(target) => {
                assert_eq!(program.output, OutputKind::Offscreen);
                assert!(self.targets.contains_key(&target), "draw into unknown target");
            }
        }

        let mut sampled = [Sampled::Unbound; CHANNEL_COUNT];
        for (slot, channel) in pass.channels.iter().enumerate() {
            sampled[slot] = match *channel {
                ChannelTexture::Unbound => Sampled::Unbound,
                ChannelTexture::Texture(texture) => {
                    assert!(self.textures.contains_key(&texture), "sampled unknown texture");
                    Sampled::Texture(texture)
                }
                ChannelTexture::Target(target) => {
                    let state = self
                        .targets
                        .get(&target)
                        .unwrap_or_else(|| panic!("sampled unknown target {target:?}"));
                    Sampled::Target(target, state.published)
                }
            };
        }

        if let PassOutput::Target(target) = pass.output {
            if let Some(state) = self.targets.get_mut(&target) {
                state.rendered = Some(self.frame);
            }
        }
        self.draws.push(RecordedDraw {
            frame: self.frame,
            program: pass.program,
            output: pass.output,
            uniforms: *pass.uniforms,
            sampled,
        });
    }

    fn end_frame(&mut self) {
        assert!(self.in_frame, "end_frame without begin_frame");
        for target in self.targets.values_mut() {
            target.published = target.rendered;
        }
        self.in_frame = false;
        self.frame += 1;
    }

    fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            programs: self.programs.len(),
            targets: self.targets.len(),
            textures: self.textures.len(),
        }
    }
}
