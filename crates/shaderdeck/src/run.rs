use std::path::PathBuf;

use anyhow::{Context, Result};
use effects::Catalog;
use renderer::Gallery;
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::config::{self, FileConfig};
use crate::paths::AppPaths;
use crate::state::AppState;

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let state_path = paths.state_file();
    let mut state = AppState::load_or_default(&state_path)?;
    let file = FileConfig::load(&paths.config_file())?;
    let settings = config::resolve(&file, &args)?;

    let roots = search_roots(&paths, settings.extra_roots);
    tracing::debug!(
        config = %paths.config_dir().display(),
        data = %paths.data_dir().display(),
        cache = %paths.cache_dir().display(),
        share = %paths.share_dir().display(),
        roots = ?roots,
        last_effect = ?state.last_effect,
        "resolved shaderdeck paths"
    );

    let catalog = Catalog::discover(&roots).context("failed to scan effect directories")?;
    tracing::info!(effects = catalog.len(), "loaded effect catalog");

    let mut gallery = Gallery::new(catalog, settings.renderer);
    if let Some(start) = args.effect.or_else(|| state.last_effect.clone()) {
        gallery = gallery.start_at(start);
    }
    gallery
        .on_select(move |effect| {
            if state.last_effect.as_deref() == Some(effect.id.as_str()) {
                return;
            }
            state.last_effect = Some(effect.id.clone());
            if let Err(err) = state.persist(&state_path) {
                tracing::warn!(error = %err, "failed to remember selected effect");
            }
        })
        .run()
}

/// Config-file roots first, then the standard locations.
pub fn search_roots(paths: &AppPaths, extra_roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut roots = extra_roots;
    roots.extend(paths.effect_roots());
    roots
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
