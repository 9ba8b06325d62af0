use std::time::Duration;

/// ShaderToy exposes four optional input channels (`iChannel0-3`).
pub const CHANNEL_COUNT: usize = effects::CHANNEL_SLOTS;

/// Authoring size of every offscreen buffer pass.
pub const DEFAULT_BUFFER_SIZE: (u32, u32) = (400, 300);

/// Initial gallery window size in physical pixels.
pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (1280, 720);

/// How long an effect may stay in the activating phase waiting for images.
pub const DEFAULT_ASSET_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of `vec4` slots reserved for effect-declared uniforms.
pub const CUSTOM_UNIFORM_SLOTS: usize = 8;

/// Anti-aliasing policy for the main (on-screen) pass.
///
/// Buffer passes always render single-sampled so their contents can be copied
/// and sampled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialiasing {
    /// Pick the highest sample count supported by the surface format.
    Auto,
    /// Disable MSAA and render directly into the swapchain.
    #[default]
    Off,
    /// Request a specific MSAA sample count (clamped to what the device supports).
    Samples(u32),
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window size in physical pixels.
    pub window_size: (u32, u32),
    /// Fixed size of every buffer pass target.
    pub buffer_size: (u32, u32),
    /// Pending image loads are abandoned after this long.
    pub asset_timeout: Duration,
    pub antialiasing: Antialiasing,
    /// New sessions start with the clock stopped.
    pub start_paused: bool,
    /// Compile every catalog effect once before the first frame.
    pub validate_on_scan: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            asset_timeout: DEFAULT_ASSET_TIMEOUT,
            antialiasing: Antialiasing::default(),
            start_paused: false,
            validate_on_scan: true,
        }
    }
}
