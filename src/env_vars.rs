//! Environment handling for spawned build commands.
//!
//! Two concerns live here:
//! - [`EnvOverrides`]: the `env.yaml` overrides file, applied to every child
//!   process (never to buildpilot's own environment)
//! - [`ENV_VARS`]: the `BUILDPILOT_*` variables the config loader understands,
//!   using `__` as the nesting separator (e.g. `BUILDPILOT_WORKERS__MAX_PARALLEL`)

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

/// Key whose sequence value is prepended to the inherited `PATH`
pub const PATH_PREPEND: &str = "PATH_PREPEND";

#[derive(Debug, Default, Deserialize)]
struct EnvFile {
    #[serde(default)]
    env: Option<BTreeMap<String, Value>>,
}

/// Variables to set on every spawned command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    vars: BTreeMap<String, String>,
    path_prepend: Vec<String>,
}

impl EnvOverrides {
    /// Load overrides from a YAML file. A missing file yields no overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "No env overrides file found, skipping environment overrides"
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read env file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse env file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Option<EnvFile> = serde_yaml::from_str(content)?;
        let Some(entries) = file.and_then(|f| f.env) else {
            return Ok(Self::default());
        };

        let mut overrides = Self::default();
        for (key, value) in entries {
            if key == PATH_PREPEND {
                overrides.path_prepend = match value {
                    Value::Sequence(items) => items
                        .iter()
                        .map(|v| scalar_to_string(&key, v))
                        .collect::<Result<_>>()?,
                    other => vec![scalar_to_string(&key, &other)?],
                };
            } else {
                let value = scalar_to_string(&key, &value)?;
                debug!(%key, %value, "Environment override");
                overrides.vars.insert(key, value);
            }
        }

        Ok(overrides)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.path_prepend.is_empty()
    }

    /// Plain overrides, excluding `PATH_PREPEND`
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn path_prepend(&self) -> &[String] {
        &self.path_prepend
    }

    /// `PATH` as children will see it, or `None` when nothing touches it
    pub fn effective_path(&self) -> Result<Option<OsString>> {
        let explicit = self.vars.get("PATH").map(OsString::from);
        if self.path_prepend.is_empty() {
            return Ok(explicit);
        }

        let inherited = explicit.or_else(|| std::env::var_os("PATH")).unwrap_or_default();
        let segments = self
            .path_prepend
            .iter()
            .map(PathBuf::from)
            .chain(std::env::split_paths(&inherited));
        std::env::join_paths(segments)
            .map(Some)
            .map_err(|e| anyhow!("Invalid {} entry: {}", PATH_PREPEND, e))
    }

    /// Value of `key` after overrides, falling back to the inherited environment
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned().or_else(|| std::env::var(key).ok())
    }

    /// Resolve into the `(name, value)` pairs to set on a child process
    pub fn resolved(&self) -> Result<Vec<(String, OsString)>> {
        let mut pairs: Vec<(String, OsString)> = self
            .vars
            .iter()
            .filter(|(k, _)| k.as_str() != "PATH")
            .map(|(k, v)| (k.clone(), OsString::from(v)))
            .collect();
        if let Some(path) = self.effective_path()? {
            pairs.push(("PATH".to_string(), path));
        }
        Ok(pairs)
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(anyhow!("Unsupported value for environment key {}", key)),
    }
}

/// An environment variable understood by the config loader
#[derive(Debug, Clone)]
pub struct EnvVar {
    pub name: &'static str,
    pub description: &'static str,
    pub default: Option<&'static str>,
}

pub static ENV_VARS: &[EnvVar] = &[
    EnvVar {
        name: "BUILDPILOT_ACTIVE_PROFILE",
        description: "Profile to run, or \"all\" to run every profile in turn",
        default: Some("all"),
    },
    EnvVar {
        name: "BUILDPILOT_FAIL_ON_ERROR",
        description: "Exit non-zero when any project fails",
        default: Some("false"),
    },
    EnvVar {
        name: "BUILDPILOT_WORKERS__MAX_PARALLEL",
        description: "Maximum concurrent project builds (0 = one per CPU)",
        default: Some("0"),
    },
    EnvVar {
        name: "BUILDPILOT_WORKERS__CORES_RESERVED",
        description: "CPU cores left free when sizing the worker pool",
        default: Some("0"),
    },
    EnvVar {
        name: "BUILDPILOT_PATHS__CONFIG_DIR",
        description: "Directory holding per-type build configs",
        default: Some("config"),
    },
    EnvVar {
        name: "BUILDPILOT_PATHS__ENV_FILE",
        description: "Environment overrides file applied to build commands",
        default: Some("config/env.yaml"),
    },
    EnvVar {
        name: "BUILDPILOT_PATHS__SUMMARY",
        description: "Where the build summary report is written",
        default: Some("build_summary.log"),
    },
    EnvVar {
        name: "BUILDPILOT_LOGGING__LEVEL",
        description: "Log level filter (trace, debug, info, warn, error)",
        default: Some("info"),
    },
    EnvVar {
        name: "BUILDPILOT_LOGGING__TO_FILE",
        description: "Also write logs to a timestamped file under paths.logs",
        default: Some("false"),
    },
];
