//! Pass Scheduler: renders one frame of the active session.
//!
//! A frame ticks the session clock, draws every buffer step of the render
//! plan into its target, draws the main pass to the surface and lets the
//! backend publish targets for the next frame. The caller hands back the
//! token returned by the previous frame; a token from a superseded session
//! turns the frame into a no-op before any GPU work happens.
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{DrawPass, GpuBackend, PassOutput, ProgramId, TargetId};
use crate::channels::{BoundChannels, TableId};
use crate::session::{Session, SessionToken};
use crate::uniforms::{CustomUniforms, ShadertoyUniforms};

/// One offscreen pass: a buffer program drawing into its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderStep {
    /// Position in the channel tree, e.g. `buffer0` or `buffer0.1`.
    pub label: String,
    /// `None` when the program failed to compile; the step is skipped.
    pub program: Option<ProgramId>,
    pub target: TargetId,
    /// Channel table the pass samples.
    pub table: TableId,
}

/// Buffer passes in execution order: nested buffers before their parent,
/// siblings in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPlan {
    steps: Vec<RenderStep>,
}

impl RenderPlan {
    pub fn new(steps: Vec<RenderStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[RenderStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame rendered; pass the token to the next frame.
    Scheduled(SessionToken),
    /// The token belongs to an ended session; nothing was touched.
    Stale,
    /// Assets are still loading; nothing was drawn.
    Activating,
}

#[derive(Debug)]
struct RenderStats {
    frames: u32,
    last_report: Instant,
}

impl RenderStats {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            last_report: now,
        }
    }

    fn record(&mut self, now: Instant, session: &Session) {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames as f32 / elapsed.as_secs_f32();
            let sample = session.clock.sample();
            debug!(
                fps = fps.round(),
                frame = sample.frame_index,
                time = sample.seconds,
                passes = session.plan.len() + 1,
                effect = %session.effect.id,
                "render stats"
            );
            self.frames = 0;
            self.last_report = now;
        }
    }
}

#[derive(Debug)]
pub struct PassScheduler {
    stats: RenderStats,
}

impl PassScheduler {
    pub fn new() -> Self {
        Self {
            stats: RenderStats::new(Instant::now()),
        }
    }

    pub fn run_frame(
        &mut self,
        token: &SessionToken,
        session: Option<&mut Session>,
        backend: &mut dyn GpuBackend,
        now: Instant,
    ) -> Result<FrameOutcome, wgpu::SurfaceError> {
        let Some(session) = session.filter(|_| token.is_current()) else {
            return Ok(FrameOutcome::Stale);
        };
        if session.token != *token {
            return Ok(FrameOutcome::Stale);
        }

        session.poll_assets(backend, now);
        if session.is_activating() {
            return Ok(FrameOutcome::Activating);
        }

        let canvas = session.mouse.canvas().pixel_size();
        if canvas.0 > 0 && canvas.1 > 0 && backend.surface_size() != canvas {
            backend.resize_surface(canvas);
        }
        backend.begin_frame()?;

        let sample = session.clock.tick(now);
        let mut uniforms = ShadertoyUniforms::default();
        uniforms.set_time(sample);
        uniforms.set_mouse(session.mouse.as_uniform());
        uniforms.refresh_date();
        session.hooks.update_uniforms(
            &mut CustomUniforms::new(&session.effect.custom_uniforms, &mut uniforms.i_custom),
            &sample,
        );

        let buffer_size = session.resources.pool().size();
        for step in session.plan.steps() {
            let Some(program) = step.program else {
                continue;
            };
            let bound = session.channels.bind(
                step.table,
                sample.seconds,
                backend,
                &mut session.resources,
            );
            let mut pass = uniforms;
            pass.set_resolution(buffer_size.0 as f32, buffer_size.1 as f32);
            pass.set_flip_y(false);
            apply_channels(&mut pass, &bound);
            backend.draw(DrawPass {
                program,
                output: PassOutput::Target(step.target),
                uniforms: &pass,
                channels: bound.textures,
            });
        }

        if let Some(program) = session.main_program {
            let root = session.channels.root_table();
            let bound = session
                .channels
                .bind(root, sample.seconds, backend, &mut session.resources);
            let (width, height) = backend.surface_size();
            let mut pass = uniforms;
            pass.set_resolution(width as f32, height as f32);
            pass.set_flip_y(true);
            apply_channels(&mut pass, &bound);
            backend.draw(DrawPass {
                program,
                output: PassOutput::Surface,
                uniforms: &pass,
                channels: bound.textures,
            });
        }

        backend.end_frame();
        session.clock.finish_frame();
        self.stats.record(now, session);
        Ok(FrameOutcome::Scheduled(token.clone()))
    }
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_channels(uniforms: &mut ShadertoyUniforms, bound: &BoundChannels) {
    for (index, (resolution, time)) in bound.resolutions.iter().zip(&bound.times).enumerate() {
        uniforms.set_channel_resolution(index, *resolution);
        uniforms.set_channel_time(index, *time);
    }
}
