//! Session/Lifecycle Manager.
//!
//! A [`Session`] owns everything one running effect needs: its compiled
//! programs, buffer targets, channel bindings, render plan, clock and mouse
//! state. [`SessionManager`] keeps at most one session alive and guarantees
//! that switching effects tears the previous one down completely before the
//! next one is built.
//!
//! Every session is identified by a generation number. Anything that outlives
//! a frame (the token the window loop holds for the next redraw, image decode
//! workers) carries a [`SessionToken`] and checks [`SessionToken::is_current`]
//! before touching session state.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use effects::{ChannelDescriptor, CustomUniform, EffectDescriptor};
use thiserror::Error;
use tracing::{debug, info, warn};
use winit::event::MouseButton;

use crate::backend::{BackendError, GpuBackend, OutputKind, ProgramId};
use crate::channels::{ChannelResolver, ImageLoadResult, MediaRegistry, ResolvedChannels};
use crate::compile::{ProgramSource, ShaderCompileError};
use crate::input::{CanvasRect, MouseState};
use crate::runtime::{FrameClock, TimeSample};
use crate::scheduler::{FrameOutcome, PassScheduler, RenderPlan};
use crate::targets::SessionResources;
use crate::types::{RendererConfig, CUSTOM_UNIFORM_SLOTS};
use crate::uniforms::CustomUniforms;

/// Capability proving which session a deferred callback belongs to.
#[derive(Clone)]
pub struct SessionToken {
    generation: u64,
    live: Arc<AtomicU64>,
}

impl SessionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while the session that issued this token is still active.
    pub fn is_current(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.generation
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && Arc::ptr_eq(&self.live, &other.live)
    }
}

impl Eq for SessionToken {}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("generation", &self.generation)
            .field("current", &self.is_current())
            .finish()
    }
}

#[derive(Debug, Default)]
struct GenerationCounter {
    live: Arc<AtomicU64>,
}

impl GenerationCounter {
    /// Starts a new generation and returns its token.
    fn advance(&self) -> SessionToken {
        let generation = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        SessionToken {
            generation,
            live: Arc::clone(&self.live),
        }
    }

    /// Invalidates every outstanding token without starting a session.
    fn invalidate(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }
}

/// Code-side extension points of an effect.
pub trait EffectHooks {
    /// Runs every frame after the standard uniforms were filled in.
    fn update_uniforms(&mut self, _uniforms: &mut CustomUniforms<'_>, _sample: &TimeSample) {}

    /// Runs once when the session ends.
    fn cleanup(&mut self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default)]
pub struct NoHooks;

impl EffectHooks for NoHooks {}

/// Writes the values an effect declared for its custom uniforms every frame.
#[derive(Debug, Clone, Default)]
pub struct StaticUniforms {
    values: Vec<CustomUniform>,
}

impl StaticUniforms {
    pub fn from_descriptor(effect: &EffectDescriptor) -> Self {
        Self {
            values: effect.custom_uniforms.clone(),
        }
    }
}

impl EffectHooks for StaticUniforms {
    fn update_uniforms(&mut self, uniforms: &mut CustomUniforms<'_>, _sample: &TimeSample) {
        for uniform in &self.values {
            uniforms.set(&uniform.name, uniform.value);
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to allocate GPU resources for effect '{effect}': {source}")]
    Resources {
        effect: String,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Waiting for image loads; nothing renders until `deadline`.
    Activating { deadline: Instant },
    Running,
}

pub struct Session {
    pub(crate) effect: Arc<EffectDescriptor>,
    pub(crate) token: SessionToken,
    phase: SessionPhase,
    pub(crate) main_program: Option<ProgramId>,
    pub(crate) plan: RenderPlan,
    pub(crate) channels: ResolvedChannels,
    pub(crate) resources: SessionResources,
    pub(crate) clock: FrameClock,
    pub(crate) mouse: MouseState,
    pub(crate) hooks: Box<dyn EffectHooks>,
    loads: Receiver<ImageLoadResult>,
    asset_timeout: Duration,
    failed_passes: Vec<String>,
}

impl Session {
    pub fn effect(&self) -> &Arc<EffectDescriptor> {
        &self.effect
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn plan(&self) -> &RenderPlan {
        &self.plan
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn mouse(&self) -> &MouseState {
        &self.mouse
    }

    pub fn is_activating(&self) -> bool {
        matches!(self.phase, SessionPhase::Activating { .. })
    }

    /// A session is degraded when at least one pass failed to compile.
    pub fn is_degraded(&self) -> bool {
        !self.failed_passes.is_empty()
    }

    pub fn failed_passes(&self) -> &[String] {
        &self.failed_passes
    }

    /// Applies finished image loads and ends the activating phase once every
    /// load settled or the asset timeout passed.
    pub fn poll_assets(&mut self, backend: &mut dyn GpuBackend, now: Instant) {
        loop {
            match self.loads.try_recv() {
                Ok(message) => {
                    self.channels
                        .apply_image(&self.token, message, backend, &mut self.resources);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if let SessionPhase::Activating { deadline } = self.phase {
            if self.channels.pending_images() == 0 {
                debug!(effect = %self.effect.id, "all assets settled");
                self.phase = SessionPhase::Running;
            } else if now >= deadline {
                self.channels.expire_pending(self.asset_timeout);
                self.phase = SessionPhase::Running;
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("effect", &self.effect.id)
            .field("token", &self.token)
            .field("phase", &self.phase)
            .field("passes", &(self.plan.len() + 1))
            .field("failed_passes", &self.failed_passes)
            .finish()
    }
}

/// Owns the active session and the generation counter.
#[derive(Debug)]
pub struct SessionManager {
    generations: GenerationCounter,
    active: Option<Session>,
    media: MediaRegistry,
    scheduler: PassScheduler,
    canvas: CanvasRect,
    buffer_size: (u32, u32),
    asset_timeout: Duration,
    start_paused: bool,
}

impl SessionManager {
    pub fn new(config: &RendererConfig, media: MediaRegistry) -> Self {
        let (width, height) = config.window_size;
        Self {
            generations: GenerationCounter::default(),
            active: None,
            media,
            scheduler: PassScheduler::new(),
            canvas: CanvasRect::from_size(width, height),
            buffer_size: config.buffer_size,
            asset_timeout: config.asset_timeout,
            start_paused: config.start_paused,
        }
    }

    pub fn media(&self) -> &MediaRegistry {
        &self.media
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn current_token(&self) -> Option<SessionToken> {
        self.active.as_ref().map(|session| session.token.clone())
    }

    /// Tears down the current session (if any) and starts `effect`.
    ///
    /// Compile failures degrade the session instead of failing activation;
    /// resource allocation failures tear down whatever was already built.
    pub fn activate(
        &mut self,
        backend: &mut dyn GpuBackend,
        effect: Arc<EffectDescriptor>,
        mut hooks: Box<dyn EffectHooks>,
        now: Instant,
    ) -> Result<SessionToken, SessionError> {
        self.deactivate(backend);

        let token = self.generations.advance();
        let (sender, loads) = crossbeam_channel::unbounded();
        let mut resources = SessionResources::new(self.buffer_size);
        let mut failed_passes = Vec::new();

        if effect.custom_uniforms.len() > CUSTOM_UNIFORM_SLOTS {
            warn!(
                effect = %effect.id,
                declared = effect.custom_uniforms.len(),
                supported = CUSTOM_UNIFORM_SLOTS,
                "effect declares more custom uniforms than supported; extra ones are undefined"
            );
        }

        let source = ProgramSource::for_effect(&effect, &effect.fragment);
        let main_program =
            match backend.create_program(effect.gl_version, &source, OutputKind::Surface) {
                Ok(program) => {
                    resources.track_program(program);
                    Some(program)
                }
                Err(err) => {
                    warn!(effect = %effect.id, error = %err, "main pass failed to compile; skipping it");
                    failed_passes.push("image".to_string());
                    None
                }
            };

        let resolved = ChannelResolver::new(&effect, &self.media, token.clone(), sender)
            .resolve(backend, &mut resources);
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(source) => {
                self.generations.invalidate();
                resources.release(backend);
                hooks.cleanup();
                return Err(SessionError::Resources {
                    effect: effect.id.clone(),
                    source,
                });
            }
        };
        failed_passes.extend(resolved.failed_passes);

        let phase = if resolved.channels.pending_images() > 0 {
            SessionPhase::Activating {
                deadline: now + self.asset_timeout,
            }
        } else {
            SessionPhase::Running
        };

        info!(
            effect = %effect.id,
            name = %effect.name,
            generation = token.generation(),
            gl = %effect.gl_version,
            buffers = resolved.plan.len(),
            pending_images = resolved.channels.pending_images(),
            degraded = !failed_passes.is_empty(),
            "activated effect"
        );

        self.active = Some(Session {
            effect,
            token: token.clone(),
            phase,
            main_program,
            plan: resolved.plan,
            channels: resolved.channels,
            resources,
            clock: FrameClock::new(!self.start_paused),
            mouse: MouseState::new(self.canvas),
            hooks,
            loads,
            asset_timeout: self.asset_timeout,
            failed_passes,
        });
        Ok(token)
    }

    /// Ends the active session: invalidates its tokens, detaches input,
    /// releases every GPU object and runs the cleanup hook.
    pub fn deactivate(&mut self, backend: &mut dyn GpuBackend) {
        let Some(mut session) = self.active.take() else {
            return;
        };
        self.generations.invalidate();
        session.resources.release(backend);
        session.hooks.cleanup();
        info!(
            effect = %session.effect.id,
            generation = session.token.generation(),
            frames = session.clock.frame(),
            "deactivated effect"
        );
    }

    pub fn run_frame(
        &mut self,
        token: &SessionToken,
        backend: &mut dyn GpuBackend,
        now: Instant,
    ) -> Result<FrameOutcome, wgpu::SurfaceError> {
        self.scheduler
            .run_frame(token, self.active.as_mut(), backend, now)
    }

    pub fn set_canvas(&mut self, canvas: CanvasRect) {
        self.canvas = canvas;
        if let Some(session) = self.active.as_mut() {
            session.mouse.set_canvas(canvas);
        }
    }

    pub fn pointer_moved(&mut self, client_x: f32, client_y: f32) {
        if let Some(session) = self.active.as_mut() {
            session.mouse.pointer_moved(client_x, client_y);
        }
    }

    pub fn pointer_down(&mut self, button: MouseButton, client_x: f32, client_y: f32) {
        if let Some(session) = self.active.as_mut() {
            session.mouse.pointer_down(button, client_x, client_y);
        }
    }

    pub fn pointer_up(&mut self, button: MouseButton) {
        if let Some(session) = self.active.as_mut() {
            session.mouse.pointer_up(button);
        }
    }

    /// Flips the run flag of the active session and returns the new state.
    pub fn toggle_pause(&mut self) -> Option<bool> {
        self.active
            .as_mut()
            .map(|session| session.clock.toggle())
    }
}

/// Compiles every program of `effect` once and releases them again.
pub fn probe_effect(
    backend: &mut dyn GpuBackend,
    effect: &EffectDescriptor,
) -> Result<(), ShaderCompileError> {
    let mut compiled = Vec::new();
    let result = probe_pass(backend, effect, &effect.fragment, OutputKind::Surface, &mut compiled)
        .and_then(|()| probe_channels(backend, effect, &effect.channels, &mut compiled));
    for program in compiled {
        backend.destroy_program(program);
    }
    result
}

fn probe_channels(
    backend: &mut dyn GpuBackend,
    effect: &EffectDescriptor,
    channels: &[ChannelDescriptor],
    compiled: &mut Vec<ProgramId>,
) -> Result<(), ShaderCompileError> {
    for channel in channels {
        if let ChannelDescriptor::BufferShader {
            fragment,
            channels: nested,
            ..
        } = channel
        {
            probe_pass(backend, effect, fragment, OutputKind::Offscreen, compiled)?;
            if let Some(nested) = nested {
                probe_channels(backend, effect, nested, compiled)?;
            }
        }
    }
    Ok(())
}

fn probe_pass(
    backend: &mut dyn GpuBackend,
    effect: &EffectDescriptor,
    body: &str,
    output: OutputKind,
    compiled: &mut Vec<ProgramId>,
) -> Result<(), ShaderCompileError> {
    let source = ProgramSource::for_effect(effect, body);
    let program = backend.create_program(effect.gl_version, &source, output)?;
    compiled.push(program);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use effects::{ChannelDescriptor, CustomUniform, EffectDescriptor};

    use super::*;
    use crate::backend::{ChannelImage, PassOutput};
    use crate::channels::FrameSource;
    use crate::testing::{RecordedDraw, RecordingBackend, Sampled};
    use crate::types::DEFAULT_ASSET_TIMEOUT;

    const MAIN: &str = "void mainImage(out vec4 c, in vec2 p) { c = texture(iChannel0, p); }";
    const BUFFER: &str = "void mainImage(out vec4 c, in vec2 p) { c = vec4(iTime); }";

    fn manager_with(media: MediaRegistry) -> SessionManager {
        let config = RendererConfig {
            window_size: (640, 480),
            ..RendererConfig::default()
        };
        SessionManager::new(&config, media)
    }

    fn manager() -> SessionManager {
        manager_with(MediaRegistry::new())
    }

    fn buffer(slot: usize, channels: Option<Vec<ChannelDescriptor>>) -> ChannelDescriptor {
        ChannelDescriptor::BufferShader {
            slot,
            fragment: BUFFER.to_string(),
            channels,
        }
    }

    fn effect(id: &str, channels: Vec<ChannelDescriptor>) -> Arc<EffectDescriptor> {
        Arc::new(EffectDescriptor::new(id, id.to_uppercase(), MAIN).with_channels(channels))
    }

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    fn frame(
        manager: &mut SessionManager,
        backend: &mut RecordingBackend,
        token: &SessionToken,
        now: Instant,
    ) -> SessionToken {
        match manager.run_frame(token, backend, now).expect("frame") {
            FrameOutcome::Scheduled(next) => next,
            other => panic!("expected a rendered frame, got {other:?}"),
        }
    }

    fn main_draws(backend: &RecordingBackend) -> Vec<&RecordedDraw> {
        backend
            .draws
            .iter()
            .filter(|draw| draw.output == PassOutput::Surface)
            .collect()
    }

    struct CountingHooks(Arc<AtomicUsize>);

    impl EffectHooks for CountingHooks {
        fn cleanup(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StaticFrames {
        size: (u32, u32),
    }

    impl FrameSource for StaticFrames {
        fn dimensions(&self) -> (u32, u32) {
            self.size
        }

        fn current_frame(&self) -> Option<ChannelImage> {
            Some(ChannelImage::filled(self.size.0, self.size.1, [255, 0, 0, 255]))
        }

        fn playback_time(&self) -> Option<f32> {
            Some(2.5)
        }
    }

    #[test]
    fn buffer_consumers_see_previous_frame() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let mut token = manager
            .activate(&mut backend, effect("feedback", vec![buffer(0, None)]), Box::new(NoHooks), start)
            .unwrap();
        let target = manager.active().unwrap().plan().steps()[0].target;

        for index in 0..3 {
            token = frame(&mut manager, &mut backend, &token, at(start, 16 * index));
        }

        for frame_index in 0..3u64 {
            let draws = backend.draws_in_frame(frame_index);
            assert_eq!(draws.len(), 2);
            assert_eq!(draws[0].output, PassOutput::Target(target));
            assert_eq!(draws[1].output, PassOutput::Surface);
            let expected = frame_index.checked_sub(1);
            assert_eq!(draws[0].sampled[0], Sampled::Target(target, expected));
            assert_eq!(draws[1].sampled[0], Sampled::Target(target, expected));
        }
    }

    #[test]
    fn passes_get_their_own_resolution_and_orientation() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let token = manager
            .activate(&mut backend, effect("feedback", vec![buffer(0, None)]), Box::new(NoHooks), start)
            .unwrap();
        frame(&mut manager, &mut backend, &token, start);

        let buffer_pass = &backend.draws[0].uniforms;
        assert_eq!(buffer_pass.i_resolution, [400.0, 300.0, 1.0]);
        assert_eq!(buffer_pass.i_flip_y, 0.0);
        let main_pass = &backend.draws[1].uniforms;
        assert_eq!(main_pass.i_resolution, [640.0, 480.0, 1.0]);
        assert_eq!(main_pass.i_flip_y, 1.0);
        assert_eq!(main_pass.channel_resolution(0), [400.0, 300.0, 1.0]);
        assert_eq!(main_pass.channel_resolution(1), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn frame_counter_holds_while_paused() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let mut token = manager
            .activate(&mut backend, effect("plain", Vec::new()), Box::new(NoHooks), start)
            .unwrap();

        let mut millis = 0;
        let mut step = |manager: &mut SessionManager, backend: &mut RecordingBackend, token: &SessionToken| {
            let next = frame(manager, backend, token, at(start, millis));
            millis += 16;
            next
        };

        for _ in 0..3 {
            token = step(&mut manager, &mut backend, &token);
        }
        assert_eq!(manager.toggle_pause(), Some(false));
        for _ in 0..2 {
            token = step(&mut manager, &mut backend, &token);
        }
        assert_eq!(manager.toggle_pause(), Some(true));
        for _ in 0..2 {
            token = step(&mut manager, &mut backend, &token);
        }

        let frames: Vec<i32> = main_draws(&backend).iter().map(|draw| draw.uniforms.i_frame).collect();
        assert_eq!(frames, vec![0, 1, 2, 3, 3, 3, 4]);

        let times: Vec<f32> = main_draws(&backend).iter().map(|draw| draw.uniforms.i_time).collect();
        assert!((times[2] - 0.032).abs() < 1e-4);
        assert_eq!(times[3], times[2]);
        assert_eq!(times[4], times[2]);
        assert!((times[5] - 0.048).abs() < 1e-4, "resumed without a jump: {}", times[5]);
    }

    #[test]
    fn stale_tokens_never_draw() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let first = manager
            .activate(&mut backend, effect("a", vec![buffer(0, None)]), Box::new(NoHooks), start)
            .unwrap();
        let first = frame(&mut manager, &mut backend, &first, start);

        let second = manager
            .activate(&mut backend, effect("b", Vec::new()), Box::new(NoHooks), start)
            .unwrap();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert!(second.generation() > first.generation());

        let draws_before = backend.draws.len();
        let outcome = manager.run_frame(&first, &mut backend, at(start, 16)).unwrap();
        assert_eq!(outcome, FrameOutcome::Stale);
        assert_eq!(backend.draws.len(), draws_before);

        frame(&mut manager, &mut backend, &second, at(start, 32));
        assert_eq!(backend.draws.len(), draws_before + 1);
    }

    #[test]
    fn activation_cycles_do_not_leak() {
        let mut media = MediaRegistry::new();
        media.register_video("camera", Arc::new(StaticFrames { size: (8, 4) }));
        let mut backend = RecordingBackend::new();
        let mut manager = manager_with(media);
        let start = Instant::now();
        let before = backend.live_resources();

        let effects = [
            effect("nested", vec![buffer(0, Some(vec![buffer(0, None), buffer(1, None)]))]),
            effect(
                "media",
                vec![
                    ChannelDescriptor::Video {
                        slot: 0,
                        source: "camera".into(),
                    },
                    ChannelDescriptor::AudioViz { slot: 1 },
                    buffer(2, None),
                ],
            ),
        ];
        for cycle in 0..6 {
            let mut token = manager
                .activate(&mut backend, Arc::clone(&effects[cycle % 2]), Box::new(NoHooks), start)
                .unwrap();
            for index in 0..2 {
                token = frame(&mut manager, &mut backend, &token, at(start, 16 * index));
            }
            assert!(!backend.live_resources().is_empty());
            manager.deactivate(&mut backend);
            assert_eq!(backend.live_resources(), before);
        }
    }

    #[test]
    fn failed_activation_releases_partial_resources() {
        let mut backend = RecordingBackend::new();
        backend.target_budget = Some(1);
        let mut manager = manager();
        let cleanups = Arc::new(AtomicUsize::new(0));

        let result = manager.activate(
            &mut backend,
            effect("greedy", vec![buffer(0, None), buffer(1, None)]),
            Box::new(CountingHooks(Arc::clone(&cleanups))),
            Instant::now(),
        );

        assert!(matches!(result, Err(SessionError::Resources { .. })));
        assert!(manager.active().is_none());
        assert!(backend.live_resources().is_empty());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deactivation_runs_cleanup_once() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let cleanups = Arc::new(AtomicUsize::new(0));
        manager
            .activate(
                &mut backend,
                effect("a", Vec::new()),
                Box::new(CountingHooks(Arc::clone(&cleanups))),
                Instant::now(),
            )
            .unwrap();
        manager
            .activate(&mut backend, effect("b", Vec::new()), Box::new(NoHooks), Instant::now())
            .unwrap();
        manager.deactivate(&mut backend);
        manager.deactivate(&mut backend);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broken_buffer_degrades_session() {
        let mut backend = RecordingBackend::failing_on("BROKEN");
        let mut manager = manager();
        let start = Instant::now();
        let broken = ChannelDescriptor::BufferShader {
            slot: 1,
            fragment: "void mainImage(out vec4 c, in vec2 p) { BROKEN }".into(),
            channels: None,
        };
        let token = manager
            .activate(&mut backend, effect("half", vec![buffer(0, None), broken]), Box::new(NoHooks), start)
            .unwrap();

        let session = manager.active().unwrap();
        assert!(session.is_degraded());
        assert_eq!(session.failed_passes(), ["buffer1".to_string()]);
        assert_eq!(session.plan().len(), 2);

        frame(&mut manager, &mut backend, &token, start);
        assert_eq!(backend.draws_in_frame(0).len(), 2);
    }

    #[test]
    fn broken_main_pass_skips_drawing() {
        let mut backend = RecordingBackend::failing_on("texture(iChannel0");
        let mut manager = manager();
        let start = Instant::now();
        let token = manager
            .activate(&mut backend, effect("dark", Vec::new()), Box::new(NoHooks), start)
            .unwrap();
        assert_eq!(manager.active().unwrap().failed_passes(), ["image".to_string()]);

        let next = frame(&mut manager, &mut backend, &token, start);
        assert_eq!(next, token);
        assert!(backend.draws.is_empty());
        assert_eq!(backend.frame, 1);
    }

    #[test]
    fn nested_buffers_render_before_their_parent() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let tree = vec![
            buffer(0, Some(vec![buffer(0, None), buffer(1, None)])),
            buffer(1, None),
        ];
        let token = manager
            .activate(&mut backend, effect("tree", tree), Box::new(NoHooks), start)
            .unwrap();

        let plan = manager.active().unwrap().plan().clone();
        let labels: Vec<&str> = plan.steps().iter().map(|step| step.label.as_str()).collect();
        assert_eq!(labels, ["buffer0.0", "buffer0.1", "buffer0", "buffer1"]);

        frame(&mut manager, &mut backend, &token, start);
        let outputs: Vec<PassOutput> = backend.draws.iter().map(|draw| draw.output).collect();
        let mut expected: Vec<PassOutput> = plan
            .steps()
            .iter()
            .map(|step| PassOutput::Target(step.target))
            .collect();
        expected.push(PassOutput::Surface);
        assert_eq!(outputs, expected);

        // The outer buffer samples its own nested table, not the root one.
        let parent = &backend.draws[2];
        assert_eq!(parent.sampled[0], Sampled::Target(plan.steps()[0].target, None));
        assert_eq!(parent.sampled[1], Sampled::Target(plan.steps()[1].target, None));
    }

    #[test]
    fn mouse_click_is_flipped_into_canvas_space() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        manager.set_canvas(CanvasRect {
            left: 10.0,
            top: 20.0,
            width: 400.0,
            height: 300.0,
        });
        let start = Instant::now();
        let token = manager
            .activate(&mut backend, effect("mouse", Vec::new()), Box::new(NoHooks), start)
            .unwrap();

        manager.pointer_down(MouseButton::Left, 60.0, 70.0);
        let token = frame(&mut manager, &mut backend, &token, start);
        manager.pointer_up(MouseButton::Left);
        frame(&mut manager, &mut backend, &token, at(start, 16));

        let draws = main_draws(&backend);
        assert_eq!(draws[0].uniforms.i_mouse, [50.0, 250.0, 50.0, 250.0]);
        assert_eq!(draws[1].uniforms.i_mouse, [50.0, 250.0, 0.0, 0.0]);
        assert_eq!(backend.surface_size(), (400, 300));
    }

    #[test]
    fn pointer_events_without_session_are_ignored() {
        let mut manager = manager();
        manager.pointer_moved(5.0, 5.0);
        manager.pointer_down(MouseButton::Left, 5.0, 5.0);
        manager.pointer_up(MouseButton::Left);
        assert_eq!(manager.toggle_pause(), None);
        assert!(manager.current_token().is_none());
    }

    #[test]
    fn image_channel_reports_natural_size_once_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.png");
        image::RgbaImage::new(64, 64).save(&path).unwrap();

        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let image = ChannelDescriptor::StaticImage { slot: 0, path };
        let mut token = manager
            .activate(&mut backend, effect("image", vec![image]), Box::new(NoHooks), start)
            .unwrap();
        assert!(manager.active().unwrap().is_activating());

        let mut attempts = 0;
        loop {
            match manager.run_frame(&token, &mut backend, start).unwrap() {
                FrameOutcome::Scheduled(next) => {
                    token = next;
                    break;
                }
                FrameOutcome::Activating => {
                    assert!(backend.draws.is_empty());
                    attempts += 1;
                    assert!(attempts < 500, "image never loaded");
                    thread::sleep(Duration::from_millis(10));
                }
                FrameOutcome::Stale => panic!("token went stale"),
            }
        }
        frame(&mut manager, &mut backend, &token, at(start, 16));

        for draw in main_draws(&backend) {
            assert_eq!(draw.uniforms.channel_resolution(0), [64.0, 64.0, 1.0]);
            assert!(matches!(draw.sampled[0], Sampled::Texture(_)));
        }
    }

    #[test]
    fn repeated_slot_keeps_the_first_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        image::RgbaImage::new(4, 4).save(&path).unwrap();

        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let channels = vec![
            ChannelDescriptor::StaticImage { slot: 0, path },
            ChannelDescriptor::AudioViz { slot: 0 },
            buffer(1, None),
            buffer(1, None),
        ];
        let mut token = manager
            .activate(&mut backend, effect("repeated", channels), Box::new(NoHooks), start)
            .unwrap();

        let session = manager.active().unwrap();
        assert_eq!(session.plan().len(), 1);
        assert_eq!(backend.live_resources().targets, 1);
        assert_eq!(backend.live_resources().textures, 0);

        let mut attempts = 0;
        loop {
            match manager.run_frame(&token, &mut backend, start).unwrap() {
                FrameOutcome::Scheduled(next) => {
                    token = next;
                    break;
                }
                FrameOutcome::Activating => {
                    attempts += 1;
                    assert!(attempts < 500, "session never left the activating phase");
                    thread::sleep(Duration::from_millis(10));
                }
                FrameOutcome::Stale => panic!("token went stale"),
            }
        }
        frame(&mut manager, &mut backend, &token, at(start, 16));

        assert_eq!(backend.live_resources().textures, 1);
        let draw = main_draws(&backend)[0];
        assert!(matches!(draw.sampled[0], Sampled::Texture(_)));
        assert_eq!(draw.uniforms.channel_resolution(0), [4.0, 4.0, 1.0]);
    }

    #[test]
    fn missing_image_times_out_unbound() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let start = Instant::now();
        let image = ChannelDescriptor::StaticImage {
            slot: 2,
            path: PathBuf::from("/nonexistent/shaderdeck/missing.png"),
        };
        let token = manager
            .activate(&mut backend, effect("missing", vec![image]), Box::new(NoHooks), start)
            .unwrap();

        let late = start + DEFAULT_ASSET_TIMEOUT + Duration::from_secs(1);
        frame(&mut manager, &mut backend, &token, late);
        let draw = &backend.draws[0];
        assert_eq!(draw.sampled[2], Sampled::Unbound);
        assert_eq!(draw.uniforms.channel_resolution(2), [0.0, 0.0, 0.0]);
        assert!(!manager.active().unwrap().is_activating());
    }

    #[test]
    fn video_and_audio_channels_refresh_each_frame() {
        let mut media = MediaRegistry::new();
        media.register_video("camera", Arc::new(StaticFrames { size: (8, 4) }));
        let mut backend = RecordingBackend::new();
        let mut manager = manager_with(media);
        let start = Instant::now();
        let channels = vec![
            ChannelDescriptor::Video {
                slot: 0,
                source: "camera".into(),
            },
            ChannelDescriptor::AudioViz { slot: 1 },
            ChannelDescriptor::Video {
                slot: 3,
                source: "unknown".into(),
            },
        ];
        let mut token = manager
            .activate(&mut backend, effect("media", channels), Box::new(NoHooks), start)
            .unwrap();
        let uploads_after_activation = backend.texture_uploads;
        for index in 0..2 {
            token = frame(&mut manager, &mut backend, &token, at(start, 16 * index));
        }

        // One video and one audio upload per frame.
        assert_eq!(backend.texture_uploads, uploads_after_activation + 4);
        let draw = main_draws(&backend)[1];
        assert_eq!(draw.uniforms.channel_resolution(0), [8.0, 4.0, 1.0]);
        assert_eq!(draw.uniforms.i_channel_time[0][0], 2.5);
        assert_eq!(draw.uniforms.channel_resolution(1), [32.0, 32.0, 1.0]);
        assert_eq!(draw.uniforms.i_channel_time[1][0], draw.uniforms.i_time);
        assert_eq!(draw.sampled[3], Sampled::Unbound);
    }

    #[test]
    fn static_uniforms_fill_custom_slots() {
        let mut backend = RecordingBackend::new();
        let mut manager = manager();
        let mut descriptor = EffectDescriptor::new("tint", "Tint", "void mainImage(out vec4 c, in vec2 p) { c = uTint; }");
        descriptor.custom_uniforms = vec![
            CustomUniform {
                name: "uScale".into(),
                value: [2.0, 0.0, 0.0, 0.0],
            },
            CustomUniform {
                name: "uTint".into(),
                value: [1.0, 0.5, 0.25, 1.0],
            },
        ];
        let hooks = StaticUniforms::from_descriptor(&descriptor);
        let start = Instant::now();
        let token = manager
            .activate(&mut backend, Arc::new(descriptor), Box::new(hooks), start)
            .unwrap();
        frame(&mut manager, &mut backend, &token, start);

        let draw = &backend.draws[0];
        assert_eq!(draw.uniforms.i_custom[0], [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(draw.uniforms.i_custom[1], [1.0, 0.5, 0.25, 1.0]);
        let program = backend.program(draw.program).unwrap();
        assert!(program.fragment.contains("#define uTint ubo._iCustom[1]"));
    }

    #[test]
    fn probe_compiles_every_pass_and_releases_them() {
        let mut backend = RecordingBackend::failing_on("BROKEN");
        let healthy = effect("ok", vec![buffer(0, Some(vec![buffer(1, None)]))]);
        probe_effect(&mut backend, &healthy).unwrap();
        assert!(backend.live_resources().is_empty());

        let nested_broken = effect(
            "deep",
            vec![buffer(
                0,
                Some(vec![ChannelDescriptor::BufferShader {
                    slot: 1,
                    fragment: "BROKEN".into(),
                    channels: None,
                }]),
            )],
        );
        let err = probe_effect(&mut backend, &nested_broken).unwrap_err();
        assert!(err.message.contains("BROKEN"));
        assert!(backend.live_resources().is_empty());
    }
}
