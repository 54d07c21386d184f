//! Filesystem loading for per-type build configs

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::schema::BuildTypeConfig;

/// File stems in the config directory that are not project types
pub const RESERVED_STEMS: &[&str] = &["config", "env"];

/// Load and validate a single type config file
pub fn load_type_file(path: &Path) -> Result<BuildTypeConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read type config: {}", path.display()))?;
    let config = BuildTypeConfig::from_yaml(&content)
        .with_context(|| format!("Failed to parse type config: {}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow!("Invalid type config {}: {}", path.display(), e))?;
    Ok(config)
}

/// `*.yaml` and `*.yml` files in `dir`, excluding reserved stems
pub fn type_config_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();

    for ext in ["yaml", "yml"] {
        let pattern = format!("{}/*.{}", escaped, ext);
        let paths = glob::glob(&pattern)
            .with_context(|| format!("Invalid config directory: {}", dir.display()))?;

        for path in paths.flatten() {
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if RESERVED_STEMS.contains(&stem.as_str()) || !path.is_file() {
                continue;
            }
            files.push((stem, path));
        }
    }

    Ok(files)
}

/// Load every type config in `dir`.
///
/// Files that fail to parse or validate are logged and skipped. When both
/// `<type>.yaml` and `<type>.yml` exist, the `.yaml` file wins.
pub fn load_type_configs(dir: &Path) -> Result<BTreeMap<String, BuildTypeConfig>> {
    let mut types = BTreeMap::new();

    if !dir.is_dir() {
        warn!("Type config directory does not exist: {}", dir.display());
        return Ok(types);
    }

    for (name, path) in type_config_files(dir)? {
        if types.contains_key(&name) {
            debug!("Ignoring duplicate type config {}", path.display());
            continue;
        }
        match load_type_file(&path) {
            Ok(config) => {
                debug!("Loaded project type: {} from {}", name, path.display());
                types.insert(name, config);
            }
            Err(e) => {
                warn!("Failed to load type config from {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(types)
}
