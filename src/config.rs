use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use sysinfo::System;

use crate::error::BuildError;
use crate::projects::{split_csv, ScanFilter};

/// Profile name that selects every defined profile
pub const ALL_PROFILES: &str = "all";

/// Profile name given to the legacy top-level `scan` block
pub const LEGACY_PROFILE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Profile to run, or "all"
    #[serde(default = "default_active_profile")]
    pub active_profile: String,
    #[serde(default)]
    pub build_profiles: BTreeMap<String, ProfileConfig>,
    /// Single-profile form, used only when `build_profiles` is empty
    #[serde(default)]
    pub scan: Option<ProfileConfig>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub env_check: EnvCheckConfig,
    /// Exit non-zero when any project fails
    #[serde(default)]
    pub fail_on_error: bool,
}

/// Just the profile keys of a config file, as written
#[derive(Deserialize)]
struct ProfileNames {
    #[serde(default)]
    build_profiles: BTreeMap<String, serde_yaml::Value>,
}

fn default_active_profile() -> String {
    ALL_PROFILES.to_string()
}

/// Raw profile settings; list fields are comma-separated strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    #[serde(default)]
    pub include_names: String,
    #[serde(default)]
    pub exclude_names: String,
    #[serde(default)]
    pub include_pattern: String,
    #[serde(default)]
    pub exclude_pattern: String,
    #[serde(default)]
    pub build_priority: String,
    /// Use this type for every project instead of detecting it
    #[serde(default)]
    pub project_type: Option<String>,
}

fn default_base_directory() -> String {
    "projects".to_string()
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            include_names: String::new(),
            exclude_names: String::new(),
            include_pattern: String::new(),
            exclude_pattern: String::new(),
            build_priority: String::new(),
            project_type: None,
        }
    }
}

impl ProfileConfig {
    /// Compile into a runnable profile
    pub fn resolve(&self, name: &str) -> Result<BuildProfile, BuildError> {
        let filter = ScanFilter::from_config(
            &self.include_names,
            &self.exclude_names,
            &self.include_pattern,
            &self.exclude_pattern,
        )
        .map_err(|e| BuildError::configuration(format!("profile {}: {}", name, e)))?;

        Ok(BuildProfile {
            name: name.to_string(),
            base_directory: PathBuf::from(&self.base_directory),
            filter,
            build_priority: split_csv(&self.build_priority),
            project_type: self
                .project_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }
}

/// A resolved scan and build bundle
#[derive(Debug, Clone)]
pub struct BuildProfile {
    pub name: String,
    pub base_directory: PathBuf,
    pub filter: ScanFilter,
    /// Projects built first, sequentially, in this order
    pub build_priority: Vec<String>,
    pub project_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `<type>.yaml` build configs
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    #[serde(default = "default_env_file")]
    pub env_file: String,
    #[serde(default = "default_summary")]
    pub summary: String,
    #[serde(default = "default_logs")]
    pub logs: String,
}

fn default_config_dir() -> String {
    "config".to_string()
}

fn default_env_file() -> String {
    "config/env.yaml".to_string()
}

fn default_summary() -> String {
    "build_summary.log".to_string()
}

fn default_logs() -> String {
    ".buildpilot/logs".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            env_file: default_env_file(),
            summary: default_summary(),
            logs: default_logs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When false, only warnings and errors are shown
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to a timestamped file under `paths.logs`
    #[serde(default)]
    pub to_file: bool,

    /// Forward build command output line by line while it runs
    #[serde(default = "default_true")]
    pub stream_output: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            to_file: false,
            stream_output: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Upper bound on concurrent builds; 0 means one per CPU
    #[serde(default)]
    pub max_parallel: usize,
    #[serde(default)]
    pub cores_reserved: usize,
}

/// Toolchain probe run before building
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvCheckConfig {
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCheck {
    /// Binary looked up on PATH
    pub name: String,
    #[serde(default)]
    pub version_command: Option<String>,
}

impl Default for EnvCheckConfig {
    fn default() -> Self {
        Self {
            variables: vec!["JAVA_HOME".to_string(), "MAVEN_HOME".to_string()],
            tools: vec![
                ToolCheck {
                    name: "java".to_string(),
                    version_command: Some("java -version".to_string()),
                },
                ToolCheck {
                    name: "mvn".to_string(),
                    version_command: Some("mvn -v".to_string()),
                },
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            active_profile: default_active_profile(),
            build_profiles: BTreeMap::new(),
            scan: None,
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
            workers: WorkersConfig::default(),
            env_check: EnvCheckConfig::default(),
            fail_on_error: false,
        }
    }
}

impl Config {
    /// Main config file, relative to the working directory
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("config/config.yaml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Self::defaults_builder()?;
        let mut layers = Vec::new();

        let main_config = Self::default_config_path();
        if main_config.exists() {
            builder = builder.add_source(config::File::from(main_config.clone()));
            layers.push(main_config);
        }

        // User config in ~/.config/buildpilot/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("buildpilot").join("config.yaml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config.clone()));
                layers.push(user_config);
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(Path::new(path)));
            layers.push(PathBuf::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BUILDPILOT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        for layer in &layers {
            let content = std::fs::read_to_string(layer)
                .with_context(|| format!("Failed to read config file: {}", layer.display()))?;
            config.restore_profile_names(&content);
        }
        Ok(config)
    }

    /// Parse YAML on top of the embedded defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config = Self::defaults_builder()?
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .context("Failed to load configuration")?;
        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.restore_profile_names(yaml);
        Ok(config)
    }

    /// The `config` crate lowercases map keys; put profile names back the way
    /// `yaml` spells them
    fn restore_profile_names(&mut self, yaml: &str) {
        let Ok(raw) = serde_yaml::from_str::<ProfileNames>(yaml) else {
            return;
        };
        for name in raw.build_profiles.into_keys() {
            let folded = name.to_lowercase();
            if folded == name {
                continue;
            }
            if let Some(profile) = self.build_profiles.remove(&folded) {
                self.build_profiles.insert(name, profile);
            }
        }
    }

    fn defaults_builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults_json = serde_json::to_string(&Config::default())
            .context("Failed to serialize default config")?;
        Ok(config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        )))
    }

    /// Every defined profile by name; the legacy `scan` block only counts
    /// when no `build_profiles` exist
    pub fn profiles(&self) -> BTreeMap<String, ProfileConfig> {
        if self.build_profiles.is_empty() {
            if let Some(ref scan) = self.scan {
                return BTreeMap::from([(LEGACY_PROFILE.to_string(), scan.clone())]);
            }
        }
        self.build_profiles.clone()
    }

    /// Profiles to run, in run order. `name` overrides `active_profile`.
    pub fn selected_profiles(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<(String, ProfileConfig)>, BuildError> {
        let profiles = self.profiles();
        let selected = name.unwrap_or(&self.active_profile).trim();

        if profiles.is_empty() {
            return Err(BuildError::configuration("no build profiles defined"));
        }

        if selected.is_empty() || selected == ALL_PROFILES {
            return Ok(profiles.into_iter().collect());
        }

        // A lone legacy scan block runs whatever the active profile says
        if self.build_profiles.is_empty() {
            return Ok(profiles.into_iter().collect());
        }

        profiles
            .get(selected)
            .map(|p| vec![(selected.to_string(), p.clone())])
            .ok_or_else(|| BuildError::configuration(format!("unknown profile: {}", selected)))
    }

    /// Worker pool size: one per CPU unless capped, never below 1
    pub fn effective_workers(&self) -> usize {
        let cpu_count = System::new_all().cpus().len().max(1);
        let core_based_max = cpu_count.saturating_sub(self.workers.cores_reserved);
        let requested = if self.workers.max_parallel == 0 {
            cpu_count
        } else {
            self.workers.max_parallel
        };
        requested.min(core_based_max).max(1)
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.config_dir)
    }

    pub fn env_file(&self) -> PathBuf {
        PathBuf::from(&self.paths.env_file)
    }

    pub fn summary_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.summary)
    }

    pub fn logs_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: &str = r#"
active_profile: backend
build_profiles:
  backend:
    base_directory: /srv/backend
    include_pattern: "svc-"
    exclude_names: "svc-legacy, svc-old"
    build_priority: "svc-common,svc-auth"
  frontend:
    base_directory: /srv/frontend
    exclude_pattern: "^test_"
    project_type: node
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.active_profile, "all");
        assert_eq!(config.paths.config_dir, "config");
        assert_eq!(config.paths.summary, "build_summary.log");
        assert!(config.logging.stream_output);
        assert!(!config.fail_on_error);
        assert_eq!(config.env_check.variables, vec!["JAVA_HOME", "MAVEN_HOME"]);
    }

    #[test]
    fn test_parse_profiles() {
        let config = Config::from_yaml_str(PROFILES).unwrap();
        assert_eq!(config.build_profiles.len(), 2);
        let backend = &config.build_profiles["backend"];
        assert_eq!(backend.base_directory, "/srv/backend");
        assert_eq!(backend.build_priority, "svc-common,svc-auth");
        // untouched sections keep their defaults
        assert_eq!(config.paths.env_file, "config/env.yaml");
    }

    #[test]
    fn test_resolve_profile() {
        let config = Config::from_yaml_str(PROFILES).unwrap();
        let profile = config.build_profiles["backend"].resolve("backend").unwrap();

        assert_eq!(profile.base_directory, PathBuf::from("/srv/backend"));
        assert_eq!(profile.build_priority, vec!["svc-common", "svc-auth"]);
        assert!(profile.filter.exclude_names.contains("svc-old"));
        assert!(profile.filter.matches("svc-api"));
        assert!(!profile.filter.matches("svc-legacy"));
        assert!(profile.project_type.is_none());

        let frontend = config.build_profiles["frontend"].resolve("frontend").unwrap();
        assert_eq!(frontend.project_type.as_deref(), Some("node"));
        assert!(!frontend.filter.matches("test_tmp"));
    }

    #[test]
    fn test_resolve_invalid_pattern_names_profile() {
        let profile = ProfileConfig {
            exclude_pattern: "[".to_string(),
            ..ProfileConfig::default()
        };
        let err = profile.resolve("broken").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_select_named_profile() {
        let config = Config::from_yaml_str(PROFILES).unwrap();
        let selected = config.selected_profiles(None).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "backend");
    }

    #[test]
    fn test_select_all_in_name_order() {
        let config = Config::from_yaml_str(PROFILES).unwrap();
        let selected = config.selected_profiles(Some("all")).unwrap();
        let names: Vec<_> = selected.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["backend", "frontend"]);
    }

    #[test]
    fn test_select_unknown_profile() {
        let config = Config::from_yaml_str(PROFILES).unwrap();
        let err = config.selected_profiles(Some("mobile")).unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
    }

    #[test]
    fn test_legacy_scan_block() {
        let config = Config::from_yaml_str(
            "scan:\n  base_directory: projects\n  build_priority: core\nlogging:\n  enabled: false\n",
        )
        .unwrap();
        assert!(!config.logging.enabled);

        let selected = config.selected_profiles(None).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, LEGACY_PROFILE);
        assert_eq!(selected[0].1.build_priority, "core");
    }

    #[test]
    fn test_no_profiles_is_error() {
        let config = Config::default();
        assert!(config.selected_profiles(None).is_err());
    }

    #[test]
    fn test_mixed_case_profile_names_kept() {
        let config = Config::from_yaml_str(
            "active_profile: Backend\nbuild_profiles:\n  Backend:\n    base_directory: /srv/Backend\n  web:\n    base_directory: /srv/web\n",
        )
        .unwrap();

        let names: Vec<_> = config.build_profiles.keys().cloned().collect();
        assert_eq!(names, vec!["Backend", "web"]);

        let selected = config.selected_profiles(None).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "Backend");
        assert_eq!(selected[0].1.base_directory, "/srv/Backend");
    }

    #[test]
    fn test_load_keeps_profile_case_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("buildpilot.yaml");
        std::fs::write(
            &path,
            "active_profile: MobileApps\nbuild_profiles:\n  MobileApps:\n    base_directory: apps\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        let selected = config.selected_profiles(None).unwrap();
        assert_eq!(selected[0].0, "MobileApps");
    }

    #[test]
    fn test_effective_workers_bounds() {
        let mut config = Config::default();
        assert!(config.effective_workers() >= 1);

        config.workers.max_parallel = 1;
        assert_eq!(config.effective_workers(), 1);

        config.workers.max_parallel = 0;
        config.workers.cores_reserved = 10_000;
        assert_eq!(config.effective_workers(), 1);
    }
}
