//! Uniform storage shared by every draw of a frame.
//!
//! Each draw claims its own aligned slot in one buffer and binds it with a
//! dynamic offset. Slots are handed out again from the start every frame; the
//! buffer only grows when a frame draws more passes than it has room for.
use std::num::NonZeroU64;

use tracing::debug;

use crate::uniforms::ShadertoyUniforms;

const INITIAL_SLOTS: u64 = 8;

const UNIFORM_SIZE: u64 = std::mem::size_of::<ShadertoyUniforms>() as u64;

/// Offset bookkeeping for the slots of one uniform buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlotLayout {
    stride: u64,
    capacity: u64,
    used: u64,
}

impl SlotLayout {
    pub fn new(size: u64, alignment: u64, capacity: u64) -> Self {
        let alignment = alignment.max(1);
        Self {
            stride: size.div_ceil(alignment) * alignment,
            capacity: capacity.max(1),
            used: 0,
        }
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Offset of the next free slot, or `None` once every slot is taken.
    pub fn claim(&mut self) -> Option<u64> {
        if self.used == self.capacity {
            return None;
        }
        let offset = self.used * self.stride;
        self.used += 1;
        Some(offset)
    }

    /// Doubles the slot count; slots already claimed keep their offsets.
    pub fn grow(&mut self) {
        self.capacity *= 2;
    }

    pub fn buffer_size(&self) -> u64 {
        self.stride * self.capacity
    }
}

pub(crate) struct UniformSlots {
    layout: SlotLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl UniformSlots {
    pub fn new(device: &wgpu::Device, bind_layout: &wgpu::BindGroupLayout, alignment: u32) -> Self {
        let layout = SlotLayout::new(UNIFORM_SIZE, alignment.into(), INITIAL_SLOTS);
        let (buffer, bind_group) = allocate(device, bind_layout, &layout);
        Self {
            layout,
            buffer,
            bind_group,
        }
    }

    pub fn begin_frame(&mut self) {
        self.layout.reset();
    }

    /// Queues `uniforms` into a fresh slot and returns its dynamic offset.
    ///
    /// Queue writes land before the frame's command buffer runs, so every pass
    /// reads the values written for it.
    pub fn write(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bind_layout: &wgpu::BindGroupLayout,
        uniforms: &ShadertoyUniforms,
    ) -> u32 {
        let offset = loop {
            if let Some(offset) = self.layout.claim() {
                break offset;
            }
            self.layout.grow();
            debug!(bytes = self.layout.buffer_size(), "uniform buffer full; growing");
            // Passes recorded earlier this frame still hold the old buffer.
            (self.buffer, self.bind_group) = allocate(device, bind_layout, &self.layout);
        };
        queue.write_buffer(&self.buffer, offset, bytemuck::bytes_of(uniforms));
        offset as u32
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

fn allocate(
    device: &wgpu::Device,
    bind_layout: &wgpu::BindGroupLayout,
    layout: &SlotLayout,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("uniform buffer"),
        size: layout.buffer_size(),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("uniform bind group"),
        layout: bind_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(UNIFORM_SIZE),
            }),
        }],
    });
    (buffer, bind_group)
}
