//! Multi-pass render-graph engine behind the shaderdeck gallery.
//!
//! An effect is compiled into a main (image) pass plus one offscreen pass per
//! buffer channel. Activation builds everything once; every frame then runs
//! the buffer passes in plan order and the main pass last:
//!
//! ```text
//!   EffectDescriptor
//!          │ SessionManager::activate
//!          ▼
//!   compile (Program Builder) ─▶ ChannelResolver ─▶ RenderPlan + targets
//!          │
//!          ▼ every redraw
//!   PassScheduler::run_frame ─▶ buffer passes ─▶ image pass ─▶ publish targets
//! ```
//!
//! Buffers always sample each other's output from the previous frame: targets
//! are published only after the whole frame was encoded. A [`SessionToken`]
//! returned by activation guards every frame and every image decode, so work
//! left over from a replaced effect never touches the new session's objects.
//!
//! GPU access goes through the [`GpuBackend`] trait; [`WgpuBackend`] is the
//! real implementation and [`Gallery`] wires it to a winit window.

mod backend;
mod channels;
mod compile;
mod gpu;
mod input;
mod runtime;
mod scheduler;
mod session;
mod targets;
#[cfg(test)]
mod testing;
mod types;
mod uniforms;
mod window;

pub use backend::{
    BackendError, ChannelImage, ChannelTexture, DrawPass, GpuBackend, OutputKind, PassOutput,
    ProgramId, ResourceCounts, TargetId, TextureId,
};
pub use channels::{
    decode_image, AssetLoadError, AudioCanvas, FrameSource, MediaRegistry, TableId,
    AUDIO_CANVAS_SIZE,
};
pub use compile::{
    build_fragment_source, templates_for, ProgramSource, ProgramStage, ProgramTemplates,
    ShaderCompileError,
};
pub use gpu::{ContextUnavailableError, WgpuBackend};
pub use input::{CanvasRect, MouseState};
pub use runtime::{FrameClock, TimeSample, MAX_FRAME_DELTA};
pub use scheduler::{FrameOutcome, PassScheduler, RenderPlan, RenderStep};
pub use session::{
    probe_effect, EffectHooks, NoHooks, Session, SessionError, SessionManager, SessionToken,
    StaticUniforms,
};
pub use targets::{FramebufferPool, SessionResources};
pub use types::{
    Antialiasing, RendererConfig, CHANNEL_COUNT, CUSTOM_UNIFORM_SLOTS, DEFAULT_ASSET_TIMEOUT,
    DEFAULT_BUFFER_SIZE, DEFAULT_WINDOW_SIZE,
};
pub use uniforms::{CustomUniforms, ShadertoyUniforms};
pub use window::Gallery;
