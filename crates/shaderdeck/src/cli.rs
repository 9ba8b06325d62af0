use std::time::Duration;

use clap::{Parser, Subcommand};
use renderer::Antialiasing;

#[derive(Parser, Debug)]
#[command(
    name = "shaderdeck",
    author,
    version,
    about = "Gallery for ShaderToy-style multi-pass shader effects",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Effect id (pack directory name) to show first; defaults to the last selection.
    #[arg(value_name = "EFFECT")]
    pub effect: Option<String>,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Size of every offscreen buffer pass (e.g. `400x300`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub buffer_size: Option<(u32, u32)>,

    /// Start every effect with the clock stopped.
    #[arg(long)]
    pub paused: bool,

    /// Compile every effect once at start-up and sink failures to the end.
    #[arg(long, overrides_with = "no_validate")]
    pub validate: bool,

    /// Skip start-up validation; broken effects are detected on selection.
    #[arg(long, overrides_with = "validate")]
    pub no_validate: bool,

    /// Give up on pending channel images after this long (e.g. `10s`, `1500ms`).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub asset_timeout: Option<Duration>,

    /// Anti-aliasing for the on-screen pass: `auto`, `off`, or a sample count (e.g. `4`).
    #[arg(long, value_name = "MODE", value_parser = parse_antialias)]
    pub antialias: Option<Antialiasing>,
}

impl RunArgs {
    /// Explicit validation choice, if either flag was given.
    pub fn validate_choice(&self) -> Option<bool> {
        match (self.validate, self.no_validate) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effect catalog in gallery order with ranks and reference links.
    List,
    /// Print resolved directories for config, data, cache, share, and effect roots.
    Where,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT (e.g. 1280x720), got '{trimmed}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in size '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in size '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err("size dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_antialias(value: &str) -> Result<Antialiasing, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("anti-alias mode must not be empty".to_string());
    }

    let normalized = trimmed.to_ascii_lowercase();
    match normalized.as_str() {
        "auto" | "max" | "default" => Ok(Antialiasing::Auto),
        "off" | "none" | "disable" | "disabled" | "0" => Ok(Antialiasing::Off),
        _ => {
            let samples: u32 = normalized.parse().map_err(|_| {
                format!("invalid anti-alias sample count '{trimmed}'; use auto/off or 2/4/8/16")
            })?;

            if samples == 1 {
                return Ok(Antialiasing::Off);
            }

            if !matches!(samples, 2 | 4 | 8 | 16) {
                return Err(format!(
                    "unsupported sample count {samples}; supported values are 2, 4, 8, or 16"
                ));
            }

            Ok(Antialiasing::Samples(samples))
        }
    }
}
