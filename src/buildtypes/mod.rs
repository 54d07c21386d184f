//! Project types and build plan resolution.
//!
//! A project type is a `config/<type>.yaml` file. [`BuildTypeRegistry`] holds
//! every loaded type for one run and answers two questions:
//! - which type does a project directory look like ([`BuildTypeRegistry::detect`])
//! - what exactly should run for a project of a given type
//!   ([`BuildTypeRegistry::plan_for`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = BuildTypeRegistry::load(Path::new("config"))?;
//! if let Some(project_type) = registry.detect_project(&project_path) {
//!     let plan = registry.plan_for(project_type, &project_path)?;
//! }
//! ```

pub mod loader;
pub mod schema;

pub use schema::{BuildBlock, BuildTypeConfig, RepoConfiguration};

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::projects::project_name;

/// Ordered commands to run in one working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub directory: PathBuf,
    pub commands: Vec<String>,
}

/// What to execute for one project, decided once per build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    /// `build_commands` at the project root, after an optional advisory git command
    Flat {
        git_command: Option<String>,
        step: BuildStep,
    },
    /// Blocks from the selected repo configuration whose directories exist
    PerDirectory {
        steps: Vec<BuildStep>,
        /// Configured directories that were missing
        skipped: Vec<PathBuf>,
    },
}

impl BuildPlan {
    /// Build steps in execution order, git command excluded
    pub fn steps(&self) -> &[BuildStep] {
        match self {
            BuildPlan::Flat { step, .. } => std::slice::from_ref(step),
            BuildPlan::PerDirectory { steps, .. } => steps,
        }
    }
}

/// All project types known for a run
#[derive(Debug, Clone, Default)]
pub struct BuildTypeRegistry {
    types: BTreeMap<String, BuildTypeConfig>,
}

impl BuildTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every type config from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let types = loader::load_type_configs(dir)?;
        info!("Loaded {} project types", types.len());
        Ok(Self { types })
    }

    pub fn insert(&mut self, name: impl Into<String>, config: BuildTypeConfig) {
        self.types.insert(name.into(), config);
    }

    pub fn get(&self, name: &str) -> Option<&BuildTypeConfig> {
        self.types.get(name)
    }

    /// Type names in detection order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// First type (by name) with an indicator among `entries`
    pub fn detect(&self, entries: &HashSet<String>) -> Option<&str> {
        self.types
            .iter()
            .find(|(_, config)| config.indicators.iter().any(|i| entries.contains(i)))
            .map(|(name, _)| name.as_str())
    }

    /// Detect the type of the project at `project_path` from its top-level entries
    pub fn detect_project(&self, project_path: &Path) -> Option<&str> {
        let entries: HashSet<String> = match fs::read_dir(project_path) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(e) => {
                warn!("Failed to read project directory {}: {}", project_path.display(), e);
                return None;
            }
        };
        self.detect(&entries)
    }

    /// Resolve the build plan for a project of type `project_type`
    pub fn plan_for(&self, project_type: &str, project_path: &Path) -> Result<BuildPlan, BuildError> {
        let config = self.get(project_type).ok_or_else(|| {
            BuildError::MissingBuildPlan(format!("no configuration found for type {}", project_type))
        })?;

        if !config.repo_configurations.is_empty() {
            let name = project_name(project_path);
            let repo = config.repo_configuration_for(&name).ok_or_else(|| {
                BuildError::MissingBuildPlan(format!("no configuration found for {}", name))
            })?;
            debug!(
                project = %name,
                repo_config = repo.repo_name.as_deref().unwrap_or("<default>"),
                "Selected repo configuration"
            );

            let mut steps = Vec::new();
            let mut skipped = Vec::new();
            for block in &repo.builds {
                let directory = project_path.join(&block.directory);
                if directory.is_dir() {
                    steps.push(BuildStep {
                        directory,
                        commands: block.commands.clone(),
                    });
                } else {
                    warn!(
                        project = %name,
                        "Build directory {} does not exist, skipping",
                        directory.display()
                    );
                    skipped.push(directory);
                }
            }
            return Ok(BuildPlan::PerDirectory { steps, skipped });
        }

        let commands = config.flat_commands();
        if commands.is_empty() {
            return Err(BuildError::MissingBuildPlan(format!(
                "no build commands configured for type {}",
                project_type
            )));
        }

        Ok(BuildPlan::Flat {
            git_command: config.git_command.clone(),
            step: BuildStep {
                directory: project_path.to_path_buf(),
                commands,
            },
        })
    }
}
