//! `wgpu` implementation of [`GpuBackend`].
//!
//! - `context` owns the instance, device and surface and picks the surface
//!   format and MSAA sample count.
//! - `pipeline` turns a program source into a render pipeline, one error
//!   scope per stage, sharing a single layout and full-screen quad.
//! - `textures` holds channel textures and buffer targets. A target is a
//!   render texture plus a published copy; draws always sample the published
//!   copy, which `end_frame` refreshes after the main pass.
//!
//! - `uniforms` gives every draw of a frame its own slot in one uniform
//!   buffer, bound with a dynamic offset.
//!
//! All passes of a frame are recorded into one command encoder. Channel bind
//! groups are cached per set of bound channels and dropped whenever a texture
//! or target they reference goes away.
mod context;
mod pipeline;
mod textures;
mod uniforms;

use std::collections::HashMap;
use std::sync::Arc;

use effects::GlVersion;
use tracing::{debug, warn};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::{
    BackendError, ChannelImage, ChannelTexture, DrawPass, GpuBackend, OutputKind, PassOutput,
    ProgramId, ResourceCounts, TargetId, TextureId,
};
use crate::compile::{ProgramSource, ShaderCompileError};
use crate::types::{Antialiasing, CHANNEL_COUNT};

pub use context::ContextUnavailableError;

use context::GpuContext;
use pipeline::{compile_program, CompiledProgram, OutputFormat, PipelineLayouts};
use textures::{create_sampler, GpuTexture, MultisampleTarget, RenderTarget};
use uniforms::UniformSlots;

struct FrameInFlight {
    surface: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    surface_drawn: bool,
}

pub struct WgpuBackend {
    context: GpuContext,
    layouts: PipelineLayouts,
    uniforms: UniformSlots,
    channel_groups: HashMap<[ChannelTexture; CHANNEL_COUNT], wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    placeholder: GpuTexture,
    multisample_target: Option<MultisampleTarget>,
    next_id: u64,
    programs: HashMap<ProgramId, CompiledProgram>,
    targets: HashMap<TargetId, RenderTarget>,
    textures: HashMap<TextureId, GpuTexture>,
    frame: Option<FrameInFlight>,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, antialiasing: Antialiasing) -> Result<Self, ContextUnavailableError> {
        let context = GpuContext::new(window, antialiasing)?;
        let layouts = PipelineLayouts::new(&context.device);

        let uniforms = UniformSlots::new(
            &context.device,
            &layouts.uniform_layout,
            context.uniform_alignment,
        );
        let sampler = create_sampler(&context.device);
        let placeholder = GpuTexture::placeholder(&context.device, &context.queue);
        let multisample_target = Self::build_multisample_target(&context);

        Ok(Self {
            context,
            layouts,
            uniforms,
            channel_groups: HashMap::new(),
            sampler,
            placeholder,
            multisample_target,
            next_id: 0,
            programs: HashMap::new(),
            targets: HashMap::new(),
            textures: HashMap::new(),
            frame: None,
        })
    }

    /// Restores the surface after `SurfaceError::Lost` or `Outdated`.
    pub fn reconfigure(&mut self) {
        self.context.reconfigure();
    }

    fn build_multisample_target(context: &GpuContext) -> Option<MultisampleTarget> {
        (context.sample_count > 1).then(|| {
            MultisampleTarget::new(
                &context.device,
                context.surface_format,
                (context.config.width, context.config.height),
                context.sample_count,
            )
        })
    }

    fn channel_bind_group(&self, channels: &[ChannelTexture; CHANNEL_COUNT]) -> wgpu::BindGroup {
        let mut entries = Vec::with_capacity(CHANNEL_COUNT * 2);
        for (index, channel) in channels.iter().enumerate() {
            let view = match *channel {
                ChannelTexture::Unbound => &self.placeholder.view,
                ChannelTexture::Texture(id) => self
                    .textures
                    .get(&id)
                    .map(|texture| &texture.view)
                    .unwrap_or(&self.placeholder.view),
                ChannelTexture::Target(id) => self
                    .targets
                    .get(&id)
                    .map(|target| &target.published_view)
                    .unwrap_or(&self.placeholder.view),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        self.context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("channel bind group"),
                layout: &self.layouts.channel_layout,
                entries: &entries,
            })
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl GpuBackend for WgpuBackend {
    fn create_program(
        &mut self,
        version: GlVersion,
        source: &ProgramSource<'_>,
        output: OutputKind,
    ) -> Result<ProgramId, ShaderCompileError> {
        let format = match output {
            OutputKind::Surface => OutputFormat {
                format: self.context.surface_format,
                sample_count: self.context.sample_count,
            },
            OutputKind::Offscreen => OutputFormat::offscreen(),
        };
        let program = compile_program(
            &self.context.device,
            &self.layouts,
            version,
            source,
            output,
            format,
        )?;
        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            warn!(program = program.0, "attempted to destroy an unknown program");
        }
    }

    fn create_target(&mut self, size: (u32, u32)) -> Result<TargetId, BackendError> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(BackendError::EmptyTarget);
        }
        let limit = self.context.max_texture_dimension;
        if width > limit || height > limit {
            return Err(BackendError::TargetTooLarge {
                width,
                height,
                limit,
            });
        }
        let id = self.next_id();
        self.targets
            .insert(TargetId(id), RenderTarget::new(&self.context.device, id, size));
        Ok(TargetId(id))
    }

    fn destroy_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_none() {
            warn!(target = target.0, "attempted to destroy an unknown target");
        }
        self.channel_groups.clear();
    }

    fn create_texture(&mut self, image: &ChannelImage) -> Result<TextureId, BackendError> {
        if !image.is_valid() {
            return Err(BackendError::InvalidImage(format!(
                "{}x{} image with {} bytes",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }
        let limit = self.context.max_texture_dimension;
        if image.width > limit || image.height > limit {
            return Err(BackendError::TargetTooLarge {
                width: image.width,
                height: image.height,
                limit,
            });
        }
        let id = self.next_id();
        let label = format!("channel texture #{id}");
        let texture = GpuTexture::upload(&self.context.device, &self.context.queue, &label, image);
        self.textures.insert(TextureId(id), texture);
        Ok(TextureId(id))
    }

    fn update_texture(&mut self, texture: TextureId, image: &ChannelImage) -> Result<(), BackendError> {
        if !image.is_valid() {
            return Err(BackendError::InvalidImage(format!(
                "{}x{} image with {} bytes",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }
        let Some(existing) = self.textures.get_mut(&texture) else {
            return Err(BackendError::InvalidImage(format!(
                "texture #{} does not exist",
                texture.0
            )));
        };
        if existing.size == (image.width, image.height) {
            existing.write(&self.context.queue, image);
        } else {
            debug!(
                texture = texture.0,
                width = image.width,
                height = image.height,
                "channel size changed; reallocating texture"
            );
            let label = format!("channel texture #{}", texture.0);
            *existing = GpuTexture::upload(&self.context.device, &self.context.queue, &label, image);
            self.channel_groups.clear();
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            warn!(texture = texture.0, "attempted to destroy an unknown texture");
        }
        self.channel_groups.clear();
    }

    fn surface_size(&self) -> (u32, u32) {
        let size = self.context.size();
        (size.width, size.height)
    }

    fn resize_surface(&mut self, size: (u32, u32)) {
        self.context.resize(PhysicalSize::new(size.0, size.1));
        self.multisample_target = Self::build_multisample_target(&self.context);
    }

    fn begin_frame(&mut self) -> Result<(), wgpu::SurfaceError> {
        if self.frame.take().is_some() {
            warn!("previous frame was never finished; dropping it");
        }
        let surface = self.context.surface.get_current_texture()?;
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        self.uniforms.begin_frame();
        self.frame = Some(FrameInFlight {
            surface,
            view,
            encoder,
            surface_drawn: false,
        });
        Ok(())
    }

    fn draw(&mut self, pass: DrawPass<'_>) {
        if self.frame.is_none() {
            warn!("draw requested outside of a frame");
            return;
        }
        if !self.programs.contains_key(&pass.program) {
            warn!(program = pass.program.0, "draw requested for an unknown program");
            return;
        }
        if let PassOutput::Target(id) = pass.output {
            if !self.targets.contains_key(&id) {
                warn!(target = id.0, "draw requested into an unknown target");
                return;
            }
        }

        if !self.channel_groups.contains_key(&pass.channels) {
            let group = self.channel_bind_group(&pass.channels);
            self.channel_groups.insert(pass.channels, group);
        }
        let offset = self.uniforms.write(
            &self.context.device,
            &self.context.queue,
            &self.layouts.uniform_layout,
            pass.uniforms,
        );

        let (Some(frame), Some(program), Some(channel_group)) = (
            self.frame.as_mut(),
            self.programs.get(&pass.program),
            self.channel_groups.get(&pass.channels),
        ) else {
            return;
        };
        let (attachment, resolve_target, clear) = match pass.output {
            PassOutput::Surface => {
                frame.surface_drawn = true;
                match self.multisample_target.as_ref() {
                    Some(msaa) => (&msaa.view, Some(&frame.view), wgpu::Color::BLACK),
                    None => (&frame.view, None, wgpu::Color::BLACK),
                }
            }
            PassOutput::Target(id) => match self.targets.get(&id) {
                Some(target) => (&target.render_view, None, wgpu::Color::TRANSPARENT),
                None => return,
            },
        };

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(match program.output {
                OutputKind::Surface => "image pass",
                OutputKind::Offscreen => "buffer pass",
            }),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: attachment,
                depth_slice: None,
                resolve_target,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        render_pass.set_pipeline(&program.pipeline);
        render_pass.set_bind_group(0, self.uniforms.bind_group(), &[offset]);
        render_pass.set_bind_group(1, channel_group, &[]);
        render_pass.set_vertex_buffer(0, self.layouts.quad.slice(..));
        render_pass.draw(0..self.layouts.quad_vertex_count(), 0..1);
    }

    fn end_frame(&mut self) {
        let Some(mut frame) = self.frame.take() else {
            return;
        };
        if !frame.surface_drawn {
            // Nothing drew the image pass; present black instead of stale contents.
            let _ = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear surface"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        for target in self.targets.values() {
            target.publish(&mut frame.encoder);
        }
        self.context
            .queue
            .submit(std::iter::once(frame.encoder.finish()));
        frame.surface.present();
    }

    fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            programs: self.programs.len(),
            targets: self.targets.len(),
            textures: self.textures.len(),
        }
    }
}
