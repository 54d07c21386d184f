//! Buildpilot - scan a directory of projects and build each one by type
//!
//! Project types live in `config/<type>.yaml`. A run scans each selected
//! profile's base directory, builds priority projects in order, then builds
//! the rest concurrently, and writes a summary report.

pub mod build_log;
pub mod builder;
pub mod buildtypes;
pub mod config;
pub mod env_vars;
pub mod envcheck;
pub mod error;
pub mod logging;
pub mod projects;
pub mod report;
pub mod runner;
pub mod scheduler;

pub use build_log::{BuildLog, BuildStatus, LogCollector, LogEntry};
pub use builder::Builder;
pub use buildtypes::{BuildPlan, BuildTypeRegistry};
pub use config::{BuildProfile, Config};
pub use error::BuildError;
pub use runner::{CommandResult, CommandRunner, MockRunner, ShellRunner};
pub use scheduler::Scheduler;
