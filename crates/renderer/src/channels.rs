//! Channel Resolver: turns an effect's channel descriptors into bindings,
//! buffer passes and render targets when a session activates, then binds
//! them for every draw.
//!
//! Resolution order defines the render plan. A buffer's own channel table is
//! resolved (recursively) before the buffer's step is appended, so nested
//! buffers always render before the buffer that samples them, and siblings
//! keep their declaration order.
//!
//! Images decode on worker threads and report back over a `crossbeam`
//! channel. Until a result is applied the slot binds the transparent
//! placeholder and reports a zero resolution.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use effects::{ChannelDescriptor, EffectDescriptor};
use image::imageops::flip_vertical_in_place;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{
    BackendError, ChannelImage, ChannelTexture, GpuBackend, OutputKind, ProgramId, TargetId,
    TextureId,
};
use crate::compile::ProgramSource;
use crate::scheduler::{RenderPlan, RenderStep};
use crate::session::SessionToken;
use crate::targets::SessionResources;
use crate::types::CHANNEL_COUNT;

/// Edge length of the square audio visualisation texture.
pub const AUDIO_CANVAS_SIZE: u32 = 32;

#[derive(Debug, Error)]
pub enum AssetLoadError {
    #[error("failed to decode image {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("image {path} did not load within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("failed to upload image {path}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("failed to start image loader for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Host-provided frames for a video channel.
///
/// Decoding is the host's business; the renderer only pulls the most recent
/// frame each time the channel is bound.
pub trait FrameSource: Send + Sync {
    fn dimensions(&self) -> (u32, u32);

    fn current_frame(&self) -> Option<ChannelImage>;

    /// Playback position reported as `iChannelTime`; `None` mirrors `iTime`.
    fn playback_time(&self) -> Option<f32> {
        None
    }
}

/// Shared RGBA canvas an external audio analyser draws into.
#[derive(Clone)]
pub struct AudioCanvas {
    pixels: Arc<Mutex<Vec<u8>>>,
}

impl AudioCanvas {
    pub fn new() -> Self {
        let len = (AUDIO_CANVAS_SIZE * AUDIO_CANVAS_SIZE * 4) as usize;
        Self {
            pixels: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    /// Replaces the canvas contents; rejects payloads of the wrong size.
    pub fn write(&self, pixels: &[u8]) -> bool {
        let mut canvas = self.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        if pixels.len() != canvas.len() {
            warn!(
                expected_len = canvas.len(),
                actual_len = pixels.len(),
                "audio canvas update ignored due to mismatched payload size"
            );
            return false;
        }
        canvas.copy_from_slice(pixels);
        true
    }

    pub fn snapshot(&self) -> ChannelImage {
        let canvas = self.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        ChannelImage::new(AUDIO_CANVAS_SIZE, AUDIO_CANVAS_SIZE, canvas.clone())
    }
}

impl Default for AudioCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AudioCanvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioCanvas")
            .field("size", &AUDIO_CANVAS_SIZE)
            .finish()
    }
}

/// Video sources and the audio canvas available to effects.
#[derive(Clone, Default)]
pub struct MediaRegistry {
    videos: HashMap<String, Arc<dyn FrameSource>>,
    audio: AudioCanvas,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_video(&mut self, name: impl Into<String>, source: Arc<dyn FrameSource>) {
        self.videos.insert(name.into(), source);
    }

    pub fn video(&self, name: &str) -> Option<Arc<dyn FrameSource>> {
        self.videos.get(name).cloned()
    }

    pub fn audio(&self) -> &AudioCanvas {
        &self.audio
    }
}

impl fmt::Debug for MediaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.videos.keys().collect();
        names.sort();
        f.debug_struct("MediaRegistry")
            .field("videos", &names)
            .field("audio", &self.audio)
            .finish()
    }
}

/// Index of a channel table inside [`ResolvedChannels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageState {
    Pending,
    Ready {
        texture: TextureId,
        size: (u32, u32),
    },
    Failed,
}

enum ChannelBinding {
    Image {
        path: PathBuf,
        state: ImageState,
    },
    Buffer {
        target: TargetId,
        size: (u32, u32),
    },
    Video {
        source: Arc<dyn FrameSource>,
        texture: Option<TextureId>,
    },
    Audio {
        canvas: AudioCanvas,
        texture: TextureId,
    },
}

#[derive(Default)]
struct ChannelTable {
    slots: [Option<ChannelBinding>; CHANNEL_COUNT],
}

/// Textures and metadata of one table, ready for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundChannels {
    pub textures: [ChannelTexture; CHANNEL_COUNT],
    pub resolutions: [[f32; 3]; CHANNEL_COUNT],
    pub times: [f32; CHANNEL_COUNT],
}

/// Result message of an image worker.
#[derive(Debug)]
pub struct ImageLoadResult {
    generation: u64,
    table: TableId,
    slot: usize,
    result: Result<ChannelImage, AssetLoadError>,
}

/// Output of [`ChannelResolver::resolve`].
pub struct ResolvedEffect {
    pub channels: ResolvedChannels,
    pub plan: RenderPlan,
    /// Labels of buffer passes whose programs failed to compile.
    pub failed_passes: Vec<String>,
}

/// Channel tables of one session.
pub struct ResolvedChannels {
    tables: Vec<ChannelTable>,
    pending_images: usize,
}

impl ResolvedChannels {
    /// The effect's own channel table, bound by the main pass.
    pub fn root_table(&self) -> TableId {
        TableId(0)
    }

    pub fn pending_images(&self) -> usize {
        self.pending_images
    }

    /// Applies a finished image decode. Results from older sessions and for
    /// slots that already gave up are dropped.
    pub fn apply_image(
        &mut self,
        token: &SessionToken,
        message: ImageLoadResult,
        backend: &mut dyn GpuBackend,
        resources: &mut SessionResources,
    ) {
        if message.generation != token.generation() {
            debug!(
                generation = message.generation,
                "discarding image load from a previous session"
            );
            return;
        }
        let Some(ChannelBinding::Image { path, state }) = self
            .tables
            .get_mut(message.table.0)
            .and_then(|table| table.slots.get_mut(message.slot))
            .and_then(Option::as_mut)
        else {
            return;
        };
        if *state != ImageState::Pending {
            return;
        }
        self.pending_images = self.pending_images.saturating_sub(1);

        let uploaded = message.result.and_then(|image| {
            backend
                .create_texture(&image)
                .map(|texture| (texture, (image.width, image.height)))
                .map_err(|source| AssetLoadError::Upload {
                    path: path.clone(),
                    source,
                })
        });
        match uploaded {
            Ok((texture, size)) => {
                resources.track_texture(texture);
                debug!(
                    path = %path.display(),
                    slot = message.slot,
                    width = size.0,
                    height = size.1,
                    "image channel ready"
                );
                *state = ImageState::Ready { texture, size };
            }
            Err(err) => {
                warn!(slot = message.slot, error = %err, "image channel left unbound");
                *state = ImageState::Failed;
            }
        }
    }

    /// Gives up on every image still loading.
    pub fn expire_pending(&mut self, timeout: Duration) {
        for table in &mut self.tables {
            for (slot, binding) in table.slots.iter_mut().enumerate() {
                if let Some(ChannelBinding::Image { path, state }) = binding {
                    if *state == ImageState::Pending {
                        let err = AssetLoadError::Timeout {
                            path: path.clone(),
                            timeout,
                        };
                        warn!(slot, error = %err, "image channel left unbound");
                        *state = ImageState::Failed;
                    }
                }
            }
        }
        self.pending_images = 0;
    }

    /// Binds one table for a draw, refreshing video and audio textures.
    pub fn bind(
        &mut self,
        table: TableId,
        seconds: f32,
        backend: &mut dyn GpuBackend,
        resources: &mut SessionResources,
    ) -> BoundChannels {
        let mut bound = BoundChannels {
            times: [seconds; CHANNEL_COUNT],
            ..BoundChannels::default()
        };
        let Some(table) = self.tables.get_mut(table.0) else {
            return bound;
        };

        for (slot, binding) in table.slots.iter_mut().enumerate() {
            let Some(binding) = binding else {
                continue;
            };
            match binding {
                ChannelBinding::Image {
                    state: ImageState::Ready { texture, size },
                    ..
                } => {
                    bound.textures[slot] = ChannelTexture::Texture(*texture);
                    bound.resolutions[slot] = [size.0 as f32, size.1 as f32, 1.0];
                }
                ChannelBinding::Image { .. } => {}
                ChannelBinding::Buffer { target, size } => {
                    bound.textures[slot] = ChannelTexture::Target(*target);
                    bound.resolutions[slot] = [size.0 as f32, size.1 as f32, 1.0];
                }
                ChannelBinding::Video { source, texture } => {
                    if let Some(frame) = source.current_frame().filter(ChannelImage::is_valid) {
                        refresh_texture(texture, &frame, slot, backend, resources);
                    }
                    if let Some(texture) = texture {
                        let (width, height) = source.dimensions();
                        bound.textures[slot] = ChannelTexture::Texture(*texture);
                        bound.resolutions[slot] = [width as f32, height as f32, 1.0];
                    }
                    if let Some(time) = source.playback_time() {
                        bound.times[slot] = time;
                    }
                }
                ChannelBinding::Audio { canvas, texture } => {
                    if let Err(err) = backend.update_texture(*texture, &canvas.snapshot()) {
                        warn!(slot, error = %err, "failed to refresh audio channel");
                    }
                    bound.textures[slot] = ChannelTexture::Texture(*texture);
                    bound.resolutions[slot] = [AUDIO_CANVAS_SIZE as f32, AUDIO_CANVAS_SIZE as f32, 1.0];
                }
            }
        }
        bound
    }
}

fn refresh_texture(
    texture: &mut Option<TextureId>,
    frame: &ChannelImage,
    slot: usize,
    backend: &mut dyn GpuBackend,
    resources: &mut SessionResources,
) {
    match texture {
        Some(existing) => {
            if let Err(err) = backend.update_texture(*existing, frame) {
                warn!(slot, error = %err, "failed to refresh video channel");
            }
        }
        None => match backend.create_texture(frame) {
            Ok(created) => {
                resources.track_texture(created);
                *texture = Some(created);
            }
            Err(err) => warn!(slot, error = %err, "failed to create video channel texture"),
        },
    }
}

/// Walks an effect's channel tree once at activation.
pub struct ChannelResolver<'a> {
    effect: &'a EffectDescriptor,
    media: &'a MediaRegistry,
    token: SessionToken,
    loads: Sender<ImageLoadResult>,
    tables: Vec<ChannelTable>,
    steps: Vec<RenderStep>,
    failed_passes: Vec<String>,
    pending_images: usize,
}

impl<'a> ChannelResolver<'a> {
    pub fn new(
        effect: &'a EffectDescriptor,
        media: &'a MediaRegistry,
        token: SessionToken,
        loads: Sender<ImageLoadResult>,
    ) -> Self {
        Self {
            effect,
            media,
            token,
            loads,
            tables: Vec::new(),
            steps: Vec::new(),
            failed_passes: Vec::new(),
            pending_images: 0,
        }
    }

    /// Resolves the effect's channel tree. Everything allocated is tracked in
    /// `resources`, including when an allocation fails halfway.
    pub fn resolve(
        mut self,
        backend: &mut dyn GpuBackend,
        resources: &mut SessionResources,
    ) -> Result<ResolvedEffect, BackendError> {
        let effect = self.effect;
        self.resolve_table(&effect.channels, "buffer", backend, resources)?;
        Ok(ResolvedEffect {
            channels: ResolvedChannels {
                tables: self.tables,
                pending_images: self.pending_images,
            },
            plan: RenderPlan::new(self.steps),
            failed_passes: self.failed_passes,
        })
    }

    fn resolve_table(
        &mut self,
        channels: &'a [ChannelDescriptor],
        label: &str,
        backend: &mut dyn GpuBackend,
        resources: &mut SessionResources,
    ) -> Result<TableId, BackendError> {
        let table_id = TableId(self.tables.len());
        self.tables.push(ChannelTable::default());
        let mut declared = [false; CHANNEL_COUNT];

        for channel in channels {
            let slot = channel.slot();
            if slot >= CHANNEL_COUNT {
                warn!(slot, kind = %channel.kind(), "channel slot out of range; ignoring");
                continue;
            }
            // Nothing is loaded or allocated for a repeated slot.
            if std::mem::replace(&mut declared[slot], true) {
                warn!(slot, kind = %channel.kind(), "channel bound twice; keeping the first declaration");
                continue;
            }
            let binding = match channel {
                ChannelDescriptor::StaticImage { path, .. } => {
                    self.spawn_image_load(table_id, slot, path);
                    Some(ChannelBinding::Image {
                        path: path.clone(),
                        state: ImageState::Pending,
                    })
                }
                ChannelDescriptor::BufferShader {
                    fragment, channels, ..
                } => {
                    let pass_label = format!("{label}{slot}");
                    let target = resources.pool_mut().allocate(backend)?;
                    let program = self.compile_buffer(fragment, &pass_label, backend, resources);
                    let sampled = match channels {
                        Some(nested) => {
                            self.resolve_table(nested, &format!("{pass_label}."), backend, resources)?
                        }
                        None => table_id,
                    };
                    self.steps.push(RenderStep {
                        label: pass_label,
                        program,
                        target,
                        table: sampled,
                    });
                    Some(ChannelBinding::Buffer {
                        target,
                        size: resources.pool().size(),
                    })
                }
                ChannelDescriptor::Video { source, .. } => match self.media.video(source) {
                    Some(frames) => Some(ChannelBinding::Video {
                        source: frames,
                        texture: None,
                    }),
                    None => {
                        warn!(slot, source = %source, "video source is not registered; channel left unbound");
                        None
                    }
                },
                ChannelDescriptor::AudioViz { .. } => {
                    let canvas = self.media.audio().clone();
                    let texture = backend.create_texture(&canvas.snapshot())?;
                    resources.track_texture(texture);
                    Some(ChannelBinding::Audio { canvas, texture })
                }
            };

            self.tables[table_id.0].slots[slot] = binding;
        }
        Ok(table_id)
    }

    fn compile_buffer(
        &mut self,
        fragment: &str,
        label: &str,
        backend: &mut dyn GpuBackend,
        resources: &mut SessionResources,
    ) -> Option<ProgramId> {
        let source = ProgramSource::for_effect(self.effect, fragment);
        match backend.create_program(self.effect.gl_version, &source, OutputKind::Offscreen) {
            Ok(program) => {
                resources.track_program(program);
                Some(program)
            }
            Err(err) => {
                warn!(
                    effect = %self.effect.id,
                    pass = label,
                    error = %err,
                    "buffer pass failed to compile; skipping it"
                );
                self.failed_passes.push(label.to_string());
                None
            }
        }
    }

    fn spawn_image_load(&mut self, table: TableId, slot: usize, path: &Path) {
        self.pending_images += 1;
        let token = self.token.clone();
        let sender = self.loads.clone();
        let worker_path = path.to_path_buf();
        let spawned = thread::Builder::new()
            .name("shaderdeck-image".into())
            .spawn(move || {
                if !token.is_current() {
                    return;
                }
                let result = decode_image(&worker_path);
                if token.is_current() {
                    let _ = sender.send(ImageLoadResult {
                        generation: token.generation(),
                        table,
                        slot,
                        result,
                    });
                }
            });
        if let Err(source) = spawned {
            let _ = self.loads.send(ImageLoadResult {
                generation: self.token.generation(),
                table,
                slot,
                result: Err(AssetLoadError::Spawn {
                    path: path.to_path_buf(),
                    source,
                }),
            });
        }
    }
}

/// Decodes an image file into bottom-row-first RGBA8.
pub fn decode_image(path: &Path) -> Result<ChannelImage, AssetLoadError> {
    let image = image::open(path).map_err(|err| AssetLoadError::Decode {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let mut rgba = image.to_rgba8();
    flip_vertical_in_place(&mut rgba);
    let (width, height) = rgba.dimensions();
    Ok(ChannelImage::new(width, height, rgba.into_raw()))
}
