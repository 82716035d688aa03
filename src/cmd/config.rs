use std::path::Path;

use veracity::config::config_path;
use veracity::Config;

pub fn cmd_config(config: &Config, explicit: Option<&Path>) {
    let path = explicit.map_or_else(config_path, Path::to_path_buf);
    let state = if path.exists() { "" } else { " (not found, using defaults)" };

    eprintln!("⚙️  Config: {}{state}", path.display());
    eprintln!("   Results: {}", config.results_dir().display());
    println!("{config}");
}
