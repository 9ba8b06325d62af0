mod cli;
mod config;
mod paths;
mod run;
mod state;

use anyhow::Result;
use cli::Command;
use config::FileConfig;
use effects::{Catalog, SortRank};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::List) => list_effects(),
        Some(Command::Where) => print_paths(),
        None => run::run(cli.run),
    }
}

fn list_effects() -> Result<()> {
    let paths = AppPaths::discover()?;
    let file = FileConfig::load(&paths.config_file())?;
    let roots = run::search_roots(&paths, file.roots());
    let catalog = Catalog::discover(&roots)?;
    if catalog.is_empty() {
        println!("No effects were found in any effect directory.");
        return Ok(());
    }

    println!("Effects:");
    for entry in catalog.iter() {
        let rank = match entry.rank() {
            SortRank::Ranked(value) => value.to_string(),
            SortRank::Unranked => "-".to_string(),
            SortRank::Failed => "failed".to_string(),
        };
        let descriptor = entry.descriptor();
        let link = descriptor.reference_url().unwrap_or_default();
        println!(
            "  {rank:<6} {:<24} {:<32} buffers={} {link}",
            entry.id(),
            entry.name(),
            descriptor.buffer_count()
        );
        if let Some(description) = &descriptor.description {
            println!("         {description}");
        }
        if !descriptor.tags.is_empty() {
            println!("         tags: {}", descriptor.tags.join(", "));
        }
    }
    Ok(())
}

fn print_paths() -> Result<()> {
    let paths = AppPaths::discover()?;
    let file = FileConfig::load(&paths.config_file())?;
    println!("Configuration directories:");
    println!("  config:     {}", paths.config_dir().display());
    println!("  data:       {}", paths.data_dir().display());
    println!("  cache:      {}", paths.cache_dir().display());
    println!("  share:      {}", paths.share_dir().display());
    println!("  state:      {}", paths.state_file().display());
    println!("  settings:   {}", paths.config_file().display());
    println!("Effect search roots:");
    for root in run::search_roots(&paths, file.roots()) {
        println!("  {}", root.display());
    }
    Ok(())
}
