//! Framebuffer Pool and the per-session resource ledger.
//!
//! Buffer targets share the session's fixed buffer size and are only ever
//! released together, when the session ends. Publishing (making this frame's
//! output visible to the next frame's samplers) happens inside the backend at
//! `end_frame`, so the pool needs no ping-pong bookkeeping.
use tracing::debug;

use crate::backend::{BackendError, GpuBackend, ProgramId, TargetId, TextureId};

#[derive(Debug)]
pub struct FramebufferPool {
    size: (u32, u32),
    targets: Vec<TargetId>,
}

impl FramebufferPool {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size,
            targets: Vec::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn allocate(&mut self, backend: &mut dyn GpuBackend) -> Result<TargetId, BackendError> {
        let target = backend.create_target(self.size)?;
        debug!(
            target = target.0,
            width = self.size.0,
            height = self.size.1,
            "allocated buffer target"
        );
        self.targets.push(target);
        Ok(target)
    }

    pub fn release_all(&mut self, backend: &mut dyn GpuBackend) {
        for target in self.targets.drain(..) {
            backend.destroy_target(target);
        }
    }
}

/// Every GPU object a session created, released in one place.
#[derive(Debug)]
pub struct SessionResources {
    programs: Vec<ProgramId>,
    textures: Vec<TextureId>,
    pool: FramebufferPool,
}

impl SessionResources {
    pub fn new(buffer_size: (u32, u32)) -> Self {
        Self {
            programs: Vec::new(),
            textures: Vec::new(),
            pool: FramebufferPool::new(buffer_size),
        }
    }

    pub fn pool(&self) -> &FramebufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut FramebufferPool {
        &mut self.pool
    }

    pub fn track_program(&mut self, program: ProgramId) {
        self.programs.push(program);
    }

    pub fn track_texture(&mut self, texture: TextureId) {
        self.textures.push(texture);
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        debug!(
            programs = self.programs.len(),
            targets = self.pool.len(),
            textures = self.textures.len(),
            "releasing session resources"
        );
        for program in self.programs.drain(..) {
            backend.destroy_program(program);
        }
        for texture in self.textures.drain(..) {
            backend.destroy_texture(texture);
        }
        self.pool.release_all(backend);
    }
}
