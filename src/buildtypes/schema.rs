//! Per-type build configuration as read from `config/<type>.yaml`

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Build configuration for one project type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTypeConfig {
    /// Top-level file or directory names that identify this type
    #[serde(default)]
    pub indicators: Vec<String>,

    /// Runs once at the project root before flat build commands
    #[serde(default)]
    pub git_command: Option<String>,

    /// Commands run in order at the project root
    #[serde(default)]
    pub build_commands: Vec<String>,

    /// Older single-command form, used only when `build_commands` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    /// Per-repo overrides; when present these govern execution
    #[serde(default)]
    pub repo_configurations: Vec<RepoConfiguration>,
}

/// Build blocks for one named repo, or the default when unnamed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfiguration {
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub builds: Vec<BuildBlock>,
}

/// Commands to run in one subdirectory of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildBlock {
    /// Relative to the project root
    pub directory: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl BuildTypeConfig {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<(), BuildError> {
        let defaults = self
            .repo_configurations
            .iter()
            .filter(|rc| rc.repo_name.is_none())
            .count();
        if defaults > 1 {
            return Err(BuildError::configuration(format!(
                "{} unnamed repo_configurations entries, at most one default is allowed",
                defaults
            )));
        }

        for rc in &self.repo_configurations {
            for block in &rc.builds {
                if block.directory.trim().is_empty() {
                    return Err(BuildError::configuration(format!(
                        "empty build directory in repo configuration {}",
                        rc.repo_name.as_deref().unwrap_or("<default>")
                    )));
                }
            }
        }

        Ok(())
    }

    /// Flat commands, honouring the single `build_command` form
    pub fn flat_commands(&self) -> Vec<String> {
        if !self.build_commands.is_empty() {
            return self.build_commands.clone();
        }
        self.build_command.iter().cloned().collect()
    }

    /// Repo configuration for `project_name`: exact match first, then the default
    pub fn repo_configuration_for(&self, project_name: &str) -> Option<&RepoConfiguration> {
        self.repo_configurations
            .iter()
            .find(|rc| rc.repo_name.as_deref() == Some(project_name))
            .or_else(|| {
                self.repo_configurations
                    .iter()
                    .find(|rc| rc.repo_name.is_none())
            })
    }
}
