use std::borrow::Cow;

use effects::GlVersion;
use wgpu::naga::ShaderStage;
use wgpu::util::DeviceExt;

use crate::backend::OutputKind;
use crate::compile::{
    build_fragment_source, templates_for, ProgramSource, ProgramStage, ShaderCompileError,
};
use crate::types::CHANNEL_COUNT;

use super::textures::TARGET_FORMAT;

/// Two-triangle strip covering clip space.
const QUAD_VERTICES: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

/// Layouts and buffers shared by every program.
pub(crate) struct PipelineLayouts {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub channel_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub quad: wgpu::Buffer,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: std::num::NonZeroU64::new(
                        std::mem::size_of::<crate::uniforms::ShadertoyUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("channel layout"),
            entries: &build_channel_layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &channel_layout],
            push_constant_ranges: &[],
        });
        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("full-screen quad"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            uniform_layout,
            channel_layout,
            pipeline_layout,
            quad,
        }
    }

    pub fn quad_vertex_count(&self) -> u32 {
        QUAD_VERTICES.len() as u32
    }
}

pub(crate) struct CompiledProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub output: OutputKind,
}

/// Everything a pipeline needs to know about the attachment it renders into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputFormat {
    pub format: wgpu::TextureFormat,
    pub sample_count: u32,
}

impl OutputFormat {
    pub fn offscreen() -> Self {
        Self {
            format: TARGET_FORMAT,
            sample_count: 1,
        }
    }
}

/// Builds one pass pipeline, reporting validation failures per stage.
pub(crate) fn compile_program(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    version: GlVersion,
    source: &ProgramSource<'_>,
    output: OutputKind,
    format: OutputFormat,
) -> Result<CompiledProgram, ShaderCompileError> {
    let templates = templates_for(version);
    let vertex_module = scoped(device, ProgramStage::Vertex, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pass vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(templates.vertex),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        })
    })?;

    let wrapped = build_fragment_source(version, source);
    let fragment_module = scoped(device, ProgramStage::Fragment, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pass fragment"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(wrapped),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        })
    })?;

    let pipeline = scoped(device, ProgramStage::Link, || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(match output {
                OutputKind::Surface => "image pass pipeline",
                OutputKind::Offscreen => "buffer pass pipeline",
            }),
            layout: Some(&layouts.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: format.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: format.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        })
    })?;

    Ok(CompiledProgram { pipeline, output })
}

fn scoped<T>(
    device: &wgpu::Device,
    stage: ProgramStage,
    create: impl FnOnce() -> T,
) -> Result<T, ShaderCompileError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let created = create();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(ShaderCompileError::new(stage, error.to_string())),
        None => Ok(created),
    }
}

fn build_channel_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(CHANNEL_COUNT * 2);
    for index in 0..CHANNEL_COUNT as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}
