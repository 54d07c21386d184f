//! Error taxonomy for project builds.
//!
//! Only [`BuildError::Configuration`] ever aborts anything larger than a single
//! project, and then only the profile it belongs to. Everything else is folded
//! into the project's [`LogEntry`](crate::build_log::LogEntry).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Missing/malformed config or an unusable base directory
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown project type")]
    UnknownProjectType,

    /// Type resolved, but no usable build commands or repo block
    #[error("{0}")]
    MissingBuildPlan(String),

    #[error("command `{command}` failed with exit code {exit_code} in {directory}: {stderr}")]
    StepFailed {
        command: String,
        directory: PathBuf,
        exit_code: i32,
        stderr: String,
    },
}

impl BuildError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error ends a project as Skipped rather than Failed
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::UnknownProjectType | Self::MissingBuildPlan(_))
    }
}
