//! Optional `config.toml` in the config directory, merged with CLI flags into
//! the [`RendererConfig`] the gallery runs with.
//!
//! ```toml
//! window_size = "1280x720"
//! buffer_size = "400x300"
//! asset_timeout = "10s"
//! start_paused = false
//! validate_on_scan = true
//! effect_roots = ["~/shaders"]
//! ```
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use renderer::RendererConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::{parse_size, RunArgs};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid `{field}` in config file: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub window_size: Option<String>,
    pub buffer_size: Option<String>,
    pub asset_timeout: Option<String>,
    pub start_paused: Option<bool>,
    pub validate_on_scan: Option<bool>,
    /// Extra effect roots searched before the standard ones.
    pub effect_roots: Vec<PathBuf>,
}

impl FileConfig {
    /// Reads `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configured effect roots with a leading `~` expanded.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.effect_roots.iter().map(|root| expand_home(root)).collect()
    }
}

/// Final settings for one gallery run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub renderer: RendererConfig,
    /// Roots from the config file; the caller appends the standard ones.
    pub extra_roots: Vec<PathBuf>,
}

/// Layers CLI flags over the config file over built-in defaults.
pub fn resolve(file: &FileConfig, args: &RunArgs) -> Result<Settings, ConfigError> {
    let mut renderer = RendererConfig::default();

    if let Some(size) = args.size {
        renderer.window_size = size;
    } else if let Some(value) = &file.window_size {
        renderer.window_size = parse_size(value).map_err(|message| ConfigError::Invalid {
            field: "window_size",
            message,
        })?;
    }

    if let Some(size) = args.buffer_size {
        renderer.buffer_size = size;
    } else if let Some(value) = &file.buffer_size {
        renderer.buffer_size = parse_size(value).map_err(|message| ConfigError::Invalid {
            field: "buffer_size",
            message,
        })?;
    }

    if let Some(timeout) = args.asset_timeout {
        renderer.asset_timeout = timeout;
    } else if let Some(value) = &file.asset_timeout {
        renderer.asset_timeout = parse_timeout(value)?;
    }

    renderer.start_paused = args.paused || file.start_paused.unwrap_or(false);
    renderer.validate_on_scan = args
        .validate_choice()
        .or(file.validate_on_scan)
        .unwrap_or(renderer.validate_on_scan);
    if let Some(antialias) = args.antialias {
        renderer.antialiasing = antialias;
    }

    Ok(Settings {
        renderer,
        extra_roots: file.roots(),
    })
}

fn parse_timeout(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|err| ConfigError::Invalid {
        field: "asset_timeout",
        message: err.to_string(),
    })
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories_next::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{Antialiasing, DEFAULT_ASSET_TIMEOUT, DEFAULT_BUFFER_SIZE, DEFAULT_WINDOW_SIZE};
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let settings = resolve(&FileConfig::default(), &RunArgs::default()).unwrap();
        assert_eq!(settings.renderer.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(settings.renderer.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(settings.renderer.asset_timeout, DEFAULT_ASSET_TIMEOUT);
        assert!(settings.renderer.validate_on_scan);
        assert!(!settings.renderer.start_paused);
        assert!(settings.extra_roots.is_empty());
    }

    #[test]
    fn file_values_are_parsed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
window_size = "800x600"
buffer_size = "200x150"
asset_timeout = "2s 500ms"
start_paused = true
validate_on_scan = false
effect_roots = ["/opt/effects"]
"#,
        )
        .unwrap();

        let file = FileConfig::load(&path).unwrap();
        let settings = resolve(&file, &RunArgs::default()).unwrap();
        assert_eq!(settings.renderer.window_size, (800, 600));
        assert_eq!(settings.renderer.buffer_size, (200, 150));
        assert_eq!(settings.renderer.asset_timeout, Duration::from_millis(2500));
        assert!(settings.renderer.start_paused);
        assert!(!settings.renderer.validate_on_scan);
        assert_eq!(settings.extra_roots, vec![PathBuf::from("/opt/effects")]);
    }

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig {
            window_size: Some("800x600".into()),
            asset_timeout: Some("2s".into()),
            validate_on_scan: Some(false),
            ..FileConfig::default()
        };
        let args = RunArgs {
            size: Some((1024, 768)),
            asset_timeout: Some(Duration::from_secs(5)),
            validate: true,
            antialias: Some(Antialiasing::Samples(4)),
            ..RunArgs::default()
        };
        let settings = resolve(&file, &args).unwrap();
        assert_eq!(settings.renderer.window_size, (1024, 768));
        assert_eq!(settings.renderer.asset_timeout, Duration::from_secs(5));
        assert!(settings.renderer.validate_on_scan);
        assert_eq!(settings.renderer.antialiasing, Antialiasing::Samples(4));
    }

    #[test]
    fn invalid_values_name_the_field() {
        let file = FileConfig {
            asset_timeout: Some("soon".into()),
            ..FileConfig::default()
        };
        let err = resolve(&file, &RunArgs::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "asset_timeout",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "window = \"800x600\"\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
