use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// ShaderToy exposes four input channels (`iChannel0-3`).
pub const CHANNEL_SLOTS: usize = 4;

/// Base URL used to build the external reference link for keyed effects.
pub const SHADERTOY_VIEW_URL: &str = "https://www.shadertoy.com/view/";

/// GLSL dialect an effect was authored against.
///
/// Every pass of one effect shares the effect's version; nested buffers never
/// declare their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GlVersion {
    /// WebGL1-era source (`texture2D`, `gl_FragColor`).
    #[default]
    V1,
    /// WebGL2/ES3-era source (`texture`, explicit outputs).
    V2,
}

impl GlVersion {
    pub fn from_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl fmt::Display for GlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "webgl{}", self.number())
    }
}

/// Menu ordering rank.
///
/// Ranked effects come first (ascending), unranked effects follow, and effects
/// whose programs failed to compile always sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortRank {
    Ranked(i32),
    #[default]
    Unranked,
    Failed,
}

impl SortRank {
    fn bucket(self) -> (u8, i32) {
        match self {
            SortRank::Ranked(value) => (0, value),
            SortRank::Unranked => (1, 0),
            SortRank::Failed => (2, 0),
        }
    }
}

impl Ord for SortRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bucket().cmp(&other.bucket())
    }
}

impl PartialOrd for SortRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// External channel kind codes as written in manifests (`type = N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    StaticImage,
    BufferShader,
    Video,
    AudioViz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel type code {0} (expected 0=image, 1=buffer, 2=video, 3=audio)")]
pub struct UnknownChannelKind(pub u8);

impl TryFrom<u8> for ChannelKind {
    type Error = UnknownChannelKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::StaticImage),
            1 => Ok(Self::BufferShader),
            2 => Ok(Self::Video),
            3 => Ok(Self::AudioViz),
            other => Err(UnknownChannelKind(other)),
        }
    }
}

impl ChannelKind {
    pub fn code(self) -> u8 {
        match self {
            Self::StaticImage => 0,
            Self::BufferShader => 1,
            Self::Video => 2,
            Self::AudioViz => 3,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StaticImage => "image",
            Self::BufferShader => "buffer",
            Self::Video => "video",
            Self::AudioViz => "audio",
        };
        f.write_str(label)
    }
}

/// One `iChannelN` input of a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelDescriptor {
    /// Image decoded once and uploaded as a 2D texture.
    StaticImage { slot: usize, path: PathBuf },
    /// Offscreen pass rendered every frame into its own target.
    ///
    /// When `channels` is `None` the buffer samples its parent's channel
    /// table, which contains the buffer itself; that is how a buffer reads its
    /// own previous frame. A buffer with its own table has it resolved
    /// recursively and rendered before the buffer itself.
    BufferShader {
        slot: usize,
        fragment: String,
        channels: Option<Vec<ChannelDescriptor>>,
    },
    /// Frames pulled from a host-provided source registered under `source`.
    Video { slot: usize, source: String },
    /// The shared 32x32 audio visualisation canvas.
    AudioViz { slot: usize },
}

impl ChannelDescriptor {
    pub fn slot(&self) -> usize {
        match self {
            Self::StaticImage { slot, .. }
            | Self::BufferShader { slot, .. }
            | Self::Video { slot, .. }
            | Self::AudioViz { slot } => *slot,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::StaticImage { .. } => ChannelKind::StaticImage,
            Self::BufferShader { .. } => ChannelKind::BufferShader,
            Self::Video { .. } => ChannelKind::Video,
            Self::AudioViz { .. } => ChannelKind::AudioViz,
        }
    }

    /// Counts buffer passes in this channel, including nested ones.
    pub fn buffer_count(&self) -> usize {
        match self {
            Self::BufferShader { channels, .. } => {
                1 + channels
                    .iter()
                    .flatten()
                    .map(ChannelDescriptor::buffer_count)
                    .sum::<usize>()
            }
            _ => 0,
        }
    }
}

/// A named `vec4` uniform an effect declares on top of the standard set.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomUniform {
    pub name: String,
    pub value: [f32; 4],
}

/// Immutable description of one effect, built once at catalog load.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDescriptor {
    /// Stable identifier (the pack directory name).
    pub id: String,
    /// Optional external key, used for the reference link.
    pub key: Option<String>,
    pub name: String,
    /// One-line summary shown in listings.
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub sort: SortRank,
    pub gl_version: GlVersion,
    pub common: Option<String>,
    pub precision: Option<String>,
    pub fragment: String,
    pub channels: Vec<ChannelDescriptor>,
    pub custom_uniforms: Vec<CustomUniform>,
    /// Directory relative asset paths were resolved against.
    pub root: PathBuf,
}

impl EffectDescriptor {
    /// Builds a bare descriptor with defaults for every optional field.
    pub fn new(id: impl Into<String>, name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: None,
            name: name.into(),
            description: None,
            tags: Vec::new(),
            sort: SortRank::Unranked,
            gl_version: GlVersion::V1,
            common: None,
            precision: None,
            fragment: fragment.into(),
            channels: Vec::new(),
            custom_uniforms: Vec::new(),
            root: PathBuf::new(),
        }
    }

    pub fn with_channels(mut self, channels: Vec<ChannelDescriptor>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_gl_version(mut self, version: GlVersion) -> Self {
        self.gl_version = version;
        self
    }

    pub fn with_sort(mut self, sort: SortRank) -> Self {
        self.sort = sort;
        self
    }

    pub fn reference_url(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|key| format!("{SHADERTOY_VIEW_URL}{key}"))
    }

    /// Number of offscreen buffer passes across the whole channel tree.
    pub fn buffer_count(&self) -> usize {
        self.channels
            .iter()
            .map(ChannelDescriptor::buffer_count)
            .sum()
    }
}
