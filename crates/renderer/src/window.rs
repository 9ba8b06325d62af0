//! The gallery window: a winit event loop that drives one [`SessionManager`]
//! and lets the user step through a [`Catalog`].
//!
//! Keys: `Right`/`Left` select the next or previous effect, `Space` pauses,
//! `R` restarts the current effect with a fresh session, `Escape` quits.
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use effects::{Catalog, EffectDescriptor};
use tracing::{error, info, warn};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::channels::MediaRegistry;
use crate::gpu::WgpuBackend;
use crate::input::CanvasRect;
use crate::scheduler::FrameOutcome;
use crate::session::{probe_effect, SessionManager, SessionToken, StaticUniforms};
use crate::types::RendererConfig;

type SelectionCallback = Box<dyn FnMut(&EffectDescriptor)>;

/// Builder for the interactive gallery.
pub struct Gallery {
    catalog: Catalog,
    config: RendererConfig,
    media: MediaRegistry,
    start: Option<String>,
    on_select: Option<SelectionCallback>,
}

impl Gallery {
    pub fn new(catalog: Catalog, config: RendererConfig) -> Self {
        Self {
            catalog,
            config,
            media: MediaRegistry::new(),
            start: None,
            on_select: None,
        }
    }

    pub fn with_media(mut self, media: MediaRegistry) -> Self {
        self.media = media;
        self
    }

    /// Effect to show first; unknown ids fall back to the first entry.
    pub fn start_at(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    /// Called every time an effect becomes the active selection.
    pub fn on_select(mut self, callback: impl FnMut(&EffectDescriptor) + 'static) -> Self {
        self.on_select = Some(Box::new(callback));
        self
    }

    /// Opens the window and blocks until it is closed.
    pub fn run(self) -> Result<()> {
        let Gallery {
            mut catalog,
            config,
            media,
            start,
            on_select,
        } = self;
        if catalog.is_empty() {
            bail!("no effects found in any effect directory");
        }

        let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
        let (width, height) = config.window_size;
        let window = WindowBuilder::new()
            .with_title("shaderdeck")
            .with_inner_size(PhysicalSize::new(width, height))
            .build(&event_loop)
            .map_err(|err| anyhow!("failed to create gallery window: {err}"))?;
        let window = Arc::new(window);

        let mut backend = WgpuBackend::new(Arc::clone(&window), config.antialiasing)
            .context("failed to initialise GPU for the gallery window")?;

        if config.validate_on_scan {
            validate_catalog(&mut catalog, &mut backend);
        }

        let selected = start
            .as_deref()
            .and_then(|id| {
                let position = catalog.position(id);
                if position.is_none() {
                    warn!(effect = id, "requested effect not found; starting with the first one");
                }
                position
            })
            .unwrap_or(0);

        let mut sessions = SessionManager::new(&config, media);
        let size = window.inner_size();
        sessions.set_canvas(CanvasRect::from_size(size.width, size.height));

        let mut state = GalleryState {
            window,
            backend,
            sessions,
            catalog,
            selected,
            resume: None,
            token: None,
            cursor: PhysicalPosition::new(0.0, 0.0),
            on_select,
        };
        state.activate(selected);

        event_loop
            .run(move |event, elwt| match event {
                Event::WindowEvent { window_id, event } if window_id == state.window.id() => {
                    match event {
                        WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                            state.shutdown();
                            elwt.exit();
                        }
                        WindowEvent::KeyboardInput { event, .. } => {
                            if state.handle_key(&event) == KeyOutcome::Quit {
                                state.shutdown();
                                elwt.exit();
                            }
                        }
                        WindowEvent::CursorMoved { position, .. } => {
                            state.cursor = position;
                            state
                                .sessions
                                .pointer_moved(position.x as f32, position.y as f32);
                        }
                        WindowEvent::MouseInput {
                            state: ElementState::Pressed,
                            button,
                            ..
                        } => {
                            let PhysicalPosition { x, y } = state.cursor;
                            state.sessions.pointer_down(button, x as f32, y as f32);
                        }
                        WindowEvent::MouseInput {
                            state: ElementState::Released,
                            button,
                            ..
                        } => {
                            state.sessions.pointer_up(button);
                        }
                        WindowEvent::Resized(new_size) => {
                            state
                                .sessions
                                .set_canvas(CanvasRect::from_size(new_size.width, new_size.height));
                        }
                        WindowEvent::RedrawRequested => {
                            if !state.render_frame() {
                                state.shutdown();
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    state.window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                }
                _ => {}
            })
            .map_err(|err| anyhow!("gallery event loop error: {err}"))
    }
}

/// Compiles every effect once and sinks the ones that fail.
fn validate_catalog(catalog: &mut Catalog, backend: &mut WgpuBackend) {
    let failed: Vec<String> = catalog
        .iter()
        .filter_map(|entry| match probe_effect(backend, entry.descriptor()) {
            Ok(()) => None,
            Err(err) => {
                warn!(effect = entry.id(), error = %err, "effect failed validation");
                Some(entry.id().to_string())
            }
        })
        .collect();
    for id in &failed {
        catalog.mark_failed(id);
    }
    info!(
        effects = catalog.len(),
        failed = failed.len(),
        "validated effect catalog"
    );
}

/// Index reached by one navigation step from `selected`.
fn step_from(
    catalog: &Catalog,
    selected: usize,
    resume: Option<&(String, String)>,
    forward: bool,
) -> usize {
    let remembered = resume
        .map(|(previous, next)| if forward { next } else { previous })
        .and_then(|id| catalog.position(id));
    match remembered {
        Some(index) => index,
        None if forward => catalog.next_index(selected),
        None => catalog.previous_index(selected),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Quit,
}

struct GalleryState {
    window: Arc<Window>,
    backend: WgpuBackend,
    sessions: SessionManager,
    catalog: Catalog,
    selected: usize,
    /// Neighbours of an effect that was just sunk to the end of the list;
    /// navigation continues from its old place.
    resume: Option<(String, String)>,
    token: Option<SessionToken>,
    cursor: PhysicalPosition<f64>,
    on_select: Option<SelectionCallback>,
}

impl GalleryState {
    fn activate(&mut self, index: usize) {
        let Some(entry) = self.catalog.get(index) else {
            return;
        };
        let descriptor = Arc::clone(entry.descriptor());
        let hooks = Box::new(StaticUniforms::from_descriptor(&descriptor));

        self.token = match self
            .sessions
            .activate(&mut self.backend, Arc::clone(&descriptor), hooks, Instant::now())
        {
            Ok(token) => Some(token),
            Err(err) => {
                error!(effect = %descriptor.id, error = %err, "failed to activate effect");
                None
            }
        };

        let degraded = self
            .sessions
            .active()
            .map_or(true, |session| session.is_degraded());
        let neighbours = self.catalog.neighbours(&descriptor.id);
        self.resume = None;
        if degraded && self.catalog.mark_failed(&descriptor.id) {
            info!(effect = %descriptor.id, "marked effect as failed");
            self.resume = neighbours;
        }
        self.selected = self.catalog.position(&descriptor.id).unwrap_or(0);

        if let Some(callback) = self.on_select.as_mut() {
            callback(&descriptor);
        }
        self.update_title();
    }

    fn update_title(&self) {
        let Some(entry) = self.catalog.get(self.selected) else {
            return;
        };
        let mut title = format!(
            "shaderdeck - {} ({}/{})",
            entry.name(),
            self.selected + 1,
            self.catalog.len()
        );
        if entry.is_failed() {
            title.push_str(" [failed]");
        }
        let paused = self
            .sessions
            .active()
            .is_some_and(|session| !session.clock().is_running());
        if paused {
            title.push_str(" [paused]");
        }
        self.window.set_title(&title);
    }

    fn handle_key(&mut self, event: &KeyEvent) -> KeyOutcome {
        if event.state != ElementState::Pressed || event.repeat {
            return KeyOutcome::Continue;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => return KeyOutcome::Quit,
            Key::Named(NamedKey::ArrowRight) => {
                let next = step_from(&self.catalog, self.selected, self.resume.as_ref(), true);
                self.activate(next);
            }
            Key::Named(NamedKey::ArrowLeft) => {
                let previous = step_from(&self.catalog, self.selected, self.resume.as_ref(), false);
                self.activate(previous);
            }
            Key::Named(NamedKey::Space) => {
                if let Some(running) = self.sessions.toggle_pause() {
                    info!(running, "toggled playback");
                    self.update_title();
                }
            }
            Key::Character(value) if value.eq_ignore_ascii_case("r") => {
                self.activate(self.selected);
            }
            _ => {}
        }
        KeyOutcome::Continue
    }

    /// Renders one frame; returns `false` when the gallery has to stop.
    fn render_frame(&mut self) -> bool {
        let Some(token) = self.token.clone() else {
            return true;
        };
        match self.sessions.run_frame(&token, &mut self.backend, Instant::now()) {
            Ok(FrameOutcome::Scheduled(next)) => self.token = Some(next),
            Ok(FrameOutcome::Activating) => {}
            Ok(FrameOutcome::Stale) => self.token = self.sessions.current_token(),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.backend.reconfigure();
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("surface out of memory; closing gallery");
                return false;
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timeout; retrying next frame");
            }
            Err(other) => {
                warn!(error = ?other, "surface error; retrying next frame");
            }
        }
        true
    }

    fn shutdown(&mut self) {
        self.sessions.deactivate(&mut self.backend);
        self.token = None;
    }
}
