use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Application name used for platform directories and file names
pub const APP_NAME: &str = "loopdeck";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "LOOPDECK_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (LOOPDECK_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));

        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. LOOPDECK_CONFIG_DIR environment variable
/// 3. Local folder IF any config files exist (loopdeck.json, media_index.json, loopdeck.log)
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/loopdeck/{name}
/// - macOS: ~/Library/Application Support/loopdeck/{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (media index, media, logs)
///
/// Same priority as `config_file`, but the platform fallback is the data dir:
/// - Linux: ~/.local/share/loopdeck/{name}
/// - macOS: ~/Library/Application Support/loopdeck/{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Directory holding data files (media index, media, logs)
pub fn data_dir(config: &PathConfig) -> PathBuf {
    get_data_dir(config)
}

/// Ensure that configuration and data directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }

    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }

    Ok(())
}

/// Check if any config files exist in the given directory
fn has_local_config_files(dir: &Path) -> bool {
    let files = ["loopdeck.json", "media_index.json", "loopdeck.log"];
    files.iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .filter(|dir| has_local_config_files(dir))
}

/// Get the configuration directory
fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join(APP_NAME);
    }
    PathBuf::from(".")
}

/// Get the data directory
fn get_data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    if let Some(dir) = dirs_next::data_dir() {
        return dir.join(APP_NAME);
    }
    PathBuf::from(".")
}
