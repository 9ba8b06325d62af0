use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "SHADERDECK_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "SHADERDECK_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "SHADERDECK_CACHE_DIR";
pub const ENV_SHARE_DIR: &str = "SHADERDECK_SHARE_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Shaderdeck";
const APPLICATION: &str = "Shaderdeck";

/// Name of the effect directory inside every root.
const EFFECTS_DIR: &str = "effects";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    share_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir = resolve_dir(ENV_CONFIG_DIR, project_dirs.config_dir())
            .context("failed to resolve shaderdeck config directory")?;
        let data_dir = resolve_dir(ENV_DATA_DIR, project_dirs.data_dir())
            .context("failed to resolve shaderdeck data directory")?;
        let cache_dir = resolve_dir(ENV_CACHE_DIR, project_dirs.cache_dir())
            .context("failed to resolve shaderdeck cache directory")?;
        let share_dir = env_override(ENV_SHARE_DIR).unwrap_or_else(|| default_share_dir(&project_dirs));

        Ok(Self {
            config_dir,
            data_dir,
            cache_dir,
            share_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn share_dir(&self) -> &Path {
        &self.share_dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.config_dir.join("state.toml")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Effect search roots, highest precedence first. The bundled `shaders/`
    /// directory of a source checkout comes last so `cargo run` finds the
    /// demo effects without an install step.
    pub fn effect_roots(&self) -> Vec<PathBuf> {
        vec![
            self.config_dir.join(EFFECTS_DIR),
            self.data_dir.join(EFFECTS_DIR),
            self.share_dir.join(EFFECTS_DIR),
            dev_effects_dir(),
        ]
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(
        config_dir: PathBuf,
        data_dir: PathBuf,
        cache_dir: PathBuf,
        share_dir: PathBuf,
    ) -> Self {
        Self {
            config_dir,
            data_dir,
            cache_dir,
            share_dir,
        }
    }
}

fn resolve_dir(env_var: &str, default: &Path) -> Result<PathBuf> {
    if let Some(value) = env_override(env_var) {
        return Ok(value);
    }
    Ok(default.to_path_buf())
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

fn dev_effects_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../shaders")
}

#[cfg(target_family = "unix")]
fn default_share_dir(_: &ProjectDirs) -> PathBuf {
    PathBuf::from("/usr/share/shaderdeck")
}

#[cfg(not(target_family = "unix"))]
fn default_share_dir(project_dirs: &ProjectDirs) -> PathBuf {
    project_dirs.data_dir().to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &Path) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }

        fn clear(key: &'static str) -> Self {
            let previous = env::var_os(key);
            env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.previous.take() {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn env_overrides_take_precedence() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let config_dir = root.path().join("config");
        let data_dir = root.path().join("data");
        let cache_dir = root.path().join("cache");
        let share_dir = root.path().join("share");

        let _config_guard = EnvGuard::set(ENV_CONFIG_DIR, &config_dir);
        let _data_guard = EnvGuard::set(ENV_DATA_DIR, &data_dir);
        let _cache_guard = EnvGuard::set(ENV_CACHE_DIR, &cache_dir);
        let _share_guard = EnvGuard::set(ENV_SHARE_DIR, &share_dir);

        let paths = AppPaths::discover().unwrap();

        assert_eq!(paths.config_dir(), config_dir.as_path());
        assert_eq!(paths.data_dir(), data_dir.as_path());
        assert_eq!(paths.cache_dir(), cache_dir.as_path());
        assert_eq!(paths.share_dir(), share_dir.as_path());
        assert_eq!(paths.state_file(), config_dir.join("state.toml"));
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn default_share_dir_on_unix_matches_usr_share() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();

        let _config_guard = EnvGuard::set(ENV_CONFIG_DIR, &root.path().join("config"));
        let _data_guard = EnvGuard::set(ENV_DATA_DIR, &root.path().join("data"));
        let _cache_guard = EnvGuard::set(ENV_CACHE_DIR, &root.path().join("cache"));
        let _share_guard = EnvGuard::clear(ENV_SHARE_DIR);

        let paths = AppPaths::discover().unwrap();

        assert_eq!(paths.share_dir(), Path::new("/usr/share/shaderdeck"));
    }

    #[test]
    fn effect_roots_follow_precedence() {
        let paths = AppPaths::from_raw(
            PathBuf::from("/c"),
            PathBuf::from("/d"),
            PathBuf::from("/k"),
            PathBuf::from("/s"),
        );
        let roots = paths.effect_roots();
        assert_eq!(roots.len(), 4);
        assert_eq!(roots[0], Path::new("/c/effects"));
        assert_eq!(roots[1], Path::new("/d/effects"));
        assert_eq!(roots[2], Path::new("/s/effects"));
        assert!(roots[3].ends_with("shaders"));
    }
}
