//! Project discovery: immediate subdirectories of a base directory, narrowed
//! by a [`ScanFilter`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::error::BuildError;

/// Split a comma-separated config value, trimming blanks
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compile a pattern so it only matches from the start of a name
pub fn anchored_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// Which project directories take part in a run
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub include_names: BTreeSet<String>,
    pub exclude_names: BTreeSet<String>,
    pub include_pattern: Option<Regex>,
    pub exclude_pattern: Option<Regex>,
}

impl ScanFilter {
    /// Build a filter from raw config strings
    pub fn from_config(
        include_names: &str,
        exclude_names: &str,
        include_pattern: &str,
        exclude_pattern: &str,
    ) -> Result<Self, BuildError> {
        Ok(Self {
            include_names: split_csv(include_names).into_iter().collect(),
            exclude_names: split_csv(exclude_names).into_iter().collect(),
            include_pattern: compile_optional("include_pattern", include_pattern)?,
            exclude_pattern: compile_optional("exclude_pattern", exclude_pattern)?,
        })
    }

    /// Whether a directory named `name` passes every stage of the filter
    pub fn matches(&self, name: &str) -> bool {
        if !self.include_names.is_empty() && !self.include_names.contains(name) {
            return false;
        }
        if self.exclude_names.contains(name) {
            return false;
        }
        if let Some(ref pattern) = self.include_pattern {
            if !pattern.is_match(name) {
                return false;
            }
        }
        if let Some(ref pattern) = self.exclude_pattern {
            if pattern.is_match(name) {
                return false;
            }
        }
        true
    }

    /// Filter `names`, preserving their order
    pub fn apply<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter(|name| self.matches(name))
            .map(str::to_string)
            .collect()
    }
}

fn compile_optional(field: &str, pattern: &str) -> Result<Option<Regex>, BuildError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Ok(None);
    }
    anchored_regex(pattern)
        .map(Some)
        .map_err(|e| BuildError::configuration(format!("invalid {} '{}': {}", field, pattern, e)))
}

/// List the project directories under `base_dir` that pass `filter`.
///
/// Only immediate subdirectories are considered; files are ignored. Order
/// follows the directory listing.
pub fn list_projects(base_dir: &Path, filter: &ScanFilter) -> Result<Vec<PathBuf>, BuildError> {
    if !base_dir.is_dir() {
        return Err(BuildError::configuration(format!(
            "base directory {} does not exist or is not a directory",
            base_dir.display()
        )));
    }

    let entries = fs::read_dir(base_dir).map_err(|e| {
        BuildError::configuration(format!("failed to read {}: {}", base_dir.display(), e))
    })?;

    let names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    debug!(count = names.len(), base = %base_dir.display(), "Found candidate directories");

    if !filter.include_names.is_empty() {
        info!(include_names = ?filter.include_names, "Explicitly included projects");
    }

    let selected = filter.apply(names.iter().map(String::as_str));
    info!(projects = ?selected, "Final list of projects to build");

    Ok(selected.into_iter().map(|name| base_dir.join(name)).collect())
}

/// Directory name of a project path
pub fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
