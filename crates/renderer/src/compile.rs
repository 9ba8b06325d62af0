//! Program Builder: turns an effect's GLSL fragments into complete GLSL 450
//! sources that `wgpu`'s GLSL frontend accepts.
//!
//! Every pass is assembled from a fixed template pair chosen by the effect's
//! [`GlVersion`]. The fragment template receives the effect's precision, its
//! shared `common` code, and the pass body through literal placeholder
//! substitution. The template also declares the uniform block and sampler
//! bindings the backend feeds, and maps the ShaderToy names onto them with
//! macros so user code can keep saying `iTime` or `iChannel0`.
use std::fmt;

use effects::{CustomUniform, EffectDescriptor, GlVersion};
use thiserror::Error;

use crate::types::CUSTOM_UNIFORM_SLOTS;

/// Stage of program creation a failure was reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ProgramStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramStage::Vertex => f.write_str("vertex"),
            ProgramStage::Fragment => f.write_str("fragment"),
            ProgramStage::Link => f.write_str("link"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{stage} shader failed to compile: {message}")]
pub struct ShaderCompileError {
    pub stage: ProgramStage,
    pub message: String,
}

impl ShaderCompileError {
    pub fn new(stage: ProgramStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// The user-authored parts of one pass.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    pub common: Option<&'a str>,
    pub precision: Option<&'a str>,
    pub body: &'a str,
    pub custom_uniforms: &'a [CustomUniform],
}

impl<'a> ProgramSource<'a> {
    /// Source for one pass of `effect`; every pass shares the effect's
    /// common code, precision and custom uniforms.
    pub fn for_effect(effect: &'a EffectDescriptor, body: &'a str) -> Self {
        Self {
            common: effect.common.as_deref(),
            precision: effect.precision.as_deref(),
            body,
            custom_uniforms: &effect.custom_uniforms,
        }
    }
}

/// Vertex and fragment template of one GL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramTemplates {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

pub fn templates_for(version: GlVersion) -> ProgramTemplates {
    match version {
        GlVersion::V1 => ProgramTemplates {
            vertex: VERTEX_TEMPLATE,
            fragment: FRAGMENT_TEMPLATE_V1,
        },
        GlVersion::V2 => ProgramTemplates {
            vertex: VERTEX_TEMPLATE,
            fragment: FRAGMENT_TEMPLATE_V2,
        },
    }
}

/// Substitutes `source` into the fragment template of `version`.
pub fn build_fragment_source(version: GlVersion, source: &ProgramSource<'_>) -> String {
    let custom_names: Vec<&str> = source
        .custom_uniforms
        .iter()
        .map(|uniform| uniform.name.as_str())
        .collect();
    let mut custom = String::new();
    for (slot, name) in custom_names.iter().take(CUSTOM_UNIFORM_SLOTS).enumerate() {
        custom.push_str(&format!("#define {name} ubo._iCustom[{slot}]\n"));
    }

    let common = source
        .common
        .map(|common| sanitize_user_source(common, &custom_names))
        .unwrap_or_default();
    let body = sanitize_user_source(source.body, &custom_names);

    templates_for(version)
        .fragment
        .replace("{PRECISION}", resolve_precision(source.precision))
        .replace("{CUSTOM}", &custom)
        .replace("{COMMON}", &common)
        .replace("{USER_FRAGMENT}", &body)
}

fn resolve_precision(requested: Option<&str>) -> &'static str {
    match requested.map(str::trim) {
        Some("lowp") => "lowp",
        Some("mediump") => "mediump",
        Some("highp") | None => "highp",
        Some(other) => {
            tracing::warn!(precision = other, "unknown precision qualifier; using highp");
            "highp"
        }
    }
}

const STANDARD_UNIFORMS: &[&str] = &[
    "iResolution",
    "iTime",
    "iTimeDelta",
    "iFrame",
    "iMouse",
    "iDate",
    "iSampleRate",
    "iChannelTime",
    "iChannelResolution",
    "iChannel0",
    "iChannel1",
    "iChannel2",
    "iChannel3",
];

/// Drops `#version` directives and uniform declarations the template
/// already provides.
fn sanitize_user_source(source: &str, custom_names: &[&str]) -> String {
    let mut sanitized = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#version") {
            continue;
        }
        if trimmed.starts_with("uniform ") && declares_provided_uniform(trimmed, custom_names) {
            continue;
        }
        sanitized.push_str(line);
        sanitized.push('\n');
    }
    sanitized
}

fn declares_provided_uniform(line: &str, custom_names: &[&str]) -> bool {
    line.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .any(|token| STANDARD_UNIFORMS.contains(&token) || custom_names.contains(&token))
}

/// Full-screen quad; positions come from the shared vertex buffer.
const VERTEX_TEMPLATE: &str = r"#version 450
layout(location = 0) in vec2 a_position;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

macro_rules! fragment_template {
    ($compat:literal) => {
        concat!(
            r"#version 450
precision {PRECISION} float;
precision {PRECISION} int;

layout(location = 0) out vec4 shaderdeck_out;

layout(std140, set = 0, binding = 0) uniform ShaderParams {
    vec3 _iResolution;
    float _iTime;
    float _iTimeDelta;
    int _iFrame;
    float _iSampleRate;
    float _iFlipY;
    vec4 _iMouse;
    vec4 _iDate;
    float _iChannelTime[4];
    vec3 _iChannelResolution[4];
    vec4 _iCustom[8];
} ubo;

#define iResolution ubo._iResolution
#define iTime ubo._iTime
#define iTimeDelta ubo._iTimeDelta
#define iFrame ubo._iFrame
#define iMouse ubo._iMouse
#define iDate ubo._iDate
#define iSampleRate ubo._iSampleRate
#define iChannelTime ubo._iChannelTime
#define iChannelResolution ubo._iChannelResolution

layout(set = 1, binding = 0) uniform texture2D shaderdeck_channel0_texture;
layout(set = 1, binding = 1) uniform sampler shaderdeck_channel0_sampler;
layout(set = 1, binding = 2) uniform texture2D shaderdeck_channel1_texture;
layout(set = 1, binding = 3) uniform sampler shaderdeck_channel1_sampler;
layout(set = 1, binding = 4) uniform texture2D shaderdeck_channel2_texture;
layout(set = 1, binding = 5) uniform sampler shaderdeck_channel2_sampler;
layout(set = 1, binding = 6) uniform texture2D shaderdeck_channel3_texture;
layout(set = 1, binding = 7) uniform sampler shaderdeck_channel3_sampler;

#define iChannel0 sampler2D(shaderdeck_channel0_texture, shaderdeck_channel0_sampler)
#define iChannel1 sampler2D(shaderdeck_channel1_texture, shaderdeck_channel1_sampler)
#define iChannel2 sampler2D(shaderdeck_channel2_texture, shaderdeck_channel2_sampler)
#define iChannel3 sampler2D(shaderdeck_channel3_texture, shaderdeck_channel3_sampler)
",
            $compat,
            r"
vec4 shaderdeck_FragCoord;
#define gl_FragCoord shaderdeck_FragCoord

{CUSTOM}
{COMMON}
{USER_FRAGMENT}

void main() {
    #undef gl_FragCoord
    vec2 builtinFC = gl_FragCoord.xy;
    #define gl_FragCoord shaderdeck_FragCoord

    // Bottom-left origin on screen; offscreen targets are stored bottom row first.
    vec2 fragCoord = vec2(builtinFC.x, mix(builtinFC.y, iResolution.y - builtinFC.y, ubo._iFlipY));
    shaderdeck_FragCoord = vec4(fragCoord, 0.0, 1.0);

    vec4 color = vec4(0.0);
    mainImage(color, fragCoord);
    shaderdeck_out = color;
}
"
        )
    };
}

const FRAGMENT_TEMPLATE_V1: &str = fragment_template!(
    r"
#define texture2D texture
#define texture2DProj textureProj
#define texture2DLod textureLod
#define texture2DLodEXT textureLod
#define texture2DGradEXT textureGrad
"
);

const FRAGMENT_TEMPLATE_V2: &str = fragment_template!("");
