//! Builds a single project: type resolution, plan resolution, execution.
//!
//! `build` never fails. Every outcome, including skips, ends up in the
//! returned [`LogEntry`].

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::build_log::{BuildStatus, ExecutedCommand, LogEntry};
use crate::buildtypes::{BuildPlan, BuildStep, BuildTypeRegistry};
use crate::error::BuildError;
use crate::projects::project_name;
use crate::runner::CommandRunner;

pub struct Builder {
    registry: Arc<BuildTypeRegistry>,
    runner: Arc<dyn CommandRunner>,
    stream_output: bool,
}

impl Builder {
    pub fn new(registry: Arc<BuildTypeRegistry>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            registry,
            runner,
            stream_output: true,
        }
    }

    /// Forward command output to the log while it runs (default) or capture it
    pub fn with_streaming(mut self, stream_output: bool) -> Self {
        self.stream_output = stream_output;
        self
    }

    /// Build the project at `project_path`.
    ///
    /// `forced_type` skips indicator detection, as when a profile names its
    /// project type.
    #[instrument(skip_all, fields(project = %project_name(project_path)))]
    pub async fn build(
        &self,
        project_path: &Path,
        profile: &str,
        forced_type: Option<&str>,
    ) -> LogEntry {
        let mut entry = LogEntry::new(project_name(project_path), profile);

        let project_type = match forced_type {
            Some(t) => Some(t),
            None => self.registry.detect_project(project_path),
        };
        let Some(project_type) = project_type else {
            return skip(entry, BuildError::UnknownProjectType);
        };
        info!(project_type, "Resolved project type");
        entry.project_type = Some(project_type.to_string());

        let plan = match self.registry.plan_for(project_type, project_path) {
            Ok(plan) => plan,
            Err(e) => return skip(entry, e),
        };

        match &plan {
            BuildPlan::Flat {
                git_command: Some(git),
                step,
            } => self.run_git(git, &step.directory, &mut entry).await,
            BuildPlan::PerDirectory { skipped, .. } => {
                for directory in skipped {
                    entry.warnings.push(format!(
                        "build directory {} does not exist, skipped",
                        directory.display()
                    ));
                }
            }
            _ => {}
        }

        match self.run_steps(plan.steps(), &mut entry).await {
            Ok(()) => {
                entry.status = BuildStatus::Success;
                info!("Build succeeded");
            }
            Err(e) => {
                warn!(error = %e, "Build failed");
                entry.status = BuildStatus::Failed;
                entry.details = Some(e.to_string());
            }
        }
        entry
    }

    /// Git failures are recorded as warnings and never stop the build
    async fn run_git(&self, command: &str, directory: &Path, entry: &mut LogEntry) {
        let result = self.runner.run(command, directory, self.stream_output).await;
        entry.commands.push(ExecutedCommand {
            command: command.to_string(),
            directory: directory.to_path_buf(),
            exit_code: result.exit_code,
            advisory: true,
        });

        if !result.success() {
            warn!(exit_code = result.exit_code, "Git command failed, continuing");
            entry.warnings.push(format!(
                "git command `{}` failed with exit code {}: {}",
                command, result.exit_code, result.stderr
            ));
        }
    }

    /// Run steps in order, stopping at the first non-zero exit
    async fn run_steps(&self, steps: &[BuildStep], entry: &mut LogEntry) -> Result<(), BuildError> {
        for step in steps {
            for command in &step.commands {
                info!(%command, directory = %step.directory.display(), "Build");
                let result = self
                    .runner
                    .run(command, &step.directory, self.stream_output)
                    .await;
                entry.commands.push(ExecutedCommand {
                    command: command.clone(),
                    directory: step.directory.clone(),
                    exit_code: result.exit_code,
                    advisory: false,
                });

                if !result.success() {
                    return Err(BuildError::StepFailed {
                        command: command.clone(),
                        directory: step.directory.clone(),
                        exit_code: result.exit_code,
                        stderr: result.stderr,
                    });
                }
            }
        }
        Ok(())
    }
}

fn skip(mut entry: LogEntry, reason: BuildError) -> LogEntry {
    debug_assert!(reason.is_skip(), "{} does not end a build as skipped", reason);
    info!(reason = %reason, "Skipped");
    entry.status = BuildStatus::Skipped;
    entry.details = Some(reason.to_string());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildtypes::BuildTypeConfig;
    use crate::runner::MockRunner;
    use std::fs::{self, File};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn flat(indicators: &[&str], commands: &[&str]) -> BuildTypeConfig {
        BuildTypeConfig {
            indicators: indicators.iter().map(|s| s.to_string()).collect(),
            build_commands: commands.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn registry() -> BuildTypeRegistry {
        let mut registry = BuildTypeRegistry::new();
        registry.insert("maven", flat(&["pom.xml"], &["mvn -v"]));
        registry.insert("node", flat(&["package.json"], &["echo ok"]));
        registry
    }

    fn builder(registry: BuildTypeRegistry, runner: &MockRunner) -> Builder {
        Builder::new(Arc::new(registry), Arc::new(runner.clone()))
    }

    fn project(temp: &TempDir, name: &str, files: &[&str]) -> PathBuf {
        let path = temp.path().join(name);
        fs::create_dir_all(&path).unwrap();
        for file in files {
            File::create(path.join(file)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_detected_types_build_successfully() {
        let temp = tempdir().unwrap();
        let app1 = project(&temp, "app1", &["pom.xml"]);
        let app2 = project(&temp, "app2", &["package.json"]);
        let runner = MockRunner::new();
        let builder = builder(registry(), &runner);

        let e1 = builder.build(&app1, "default", None).await;
        let e2 = builder.build(&app2, "default", None).await;

        assert_eq!(e1.status, BuildStatus::Success);
        assert_eq!(e1.project_type.as_deref(), Some("maven"));
        assert_eq!(e2.status, BuildStatus::Success);
        assert_eq!(e2.project_type.as_deref(), Some("node"));
        assert_eq!(runner.commands(), vec!["mvn -v", "echo ok"]);
        assert!(runner.get_invocations().iter().all(|i| i.stream));
    }

    #[tokio::test]
    async fn test_unknown_type_skipped() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "docs", &["README.md"]);
        let runner = MockRunner::new();

        let entry = builder(registry(), &runner).build(&path, "default", None).await;

        assert_eq!(entry.status, BuildStatus::Skipped);
        assert_eq!(entry.details.as_deref(), Some("unknown project type"));
        assert!(entry.project_type.is_none());
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_forced_type_bypasses_detection() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "plain", &[]);
        let runner = MockRunner::new();

        let entry = builder(registry(), &runner)
            .build(&path, "default", Some("node"))
            .await;

        assert_eq!(entry.status, BuildStatus::Success);
        assert_eq!(entry.project_type.as_deref(), Some("node"));
    }

    #[tokio::test]
    async fn test_forced_type_without_config_skipped() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "plain", &[]);
        let runner = MockRunner::new();

        let entry = builder(registry(), &runner)
            .build(&path, "default", Some("cargo"))
            .await;

        assert_eq!(entry.status, BuildStatus::Skipped);
        assert!(entry.details.unwrap().contains("no configuration found"));
    }

    #[tokio::test]
    async fn test_first_failure_stops_remaining_commands() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "svc", &["Makefile"]);
        let mut registry = BuildTypeRegistry::new();
        registry.insert("make", flat(&["Makefile"], &["make deps", "make build", "make test"]));
        let runner = MockRunner::new().fail("make build", 2, "undefined reference");

        let entry = builder(registry, &runner).build(&path, "default", None).await;

        assert_eq!(entry.status, BuildStatus::Failed);
        assert_eq!(runner.commands(), vec!["make deps", "make build"]);
        let details = entry.details.unwrap();
        assert!(details.contains("make build"));
        assert!(details.contains("undefined reference"));
        assert_eq!(entry.commands.last().unwrap().exit_code, 2);
        assert_eq!(entry.commands.last().unwrap().directory, path);
    }

    #[tokio::test]
    async fn test_git_failure_is_advisory() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "web", &["package.json"]);
        let mut registry = BuildTypeRegistry::new();
        registry.insert(
            "node",
            BuildTypeConfig {
                git_command: Some("git pull".into()),
                ..flat(&["package.json"], &["npm ci"])
            },
        );
        let runner = MockRunner::new().fail("git pull", 128, "not a git repository");

        let entry = builder(registry, &runner).build(&path, "default", None).await;

        assert_eq!(entry.status, BuildStatus::Success);
        assert_eq!(runner.commands(), vec!["git pull", "npm ci"]);
        assert!(entry.commands[0].advisory);
        assert!(entry.warnings[0].contains("not a git repository"));
    }

    #[tokio::test]
    async fn test_per_directory_steps_run_in_their_directories() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "billing", &["pom.xml"]);
        fs::create_dir_all(path.join("api")).unwrap();
        let config = BuildTypeConfig::from_yaml(
            r#"
indicators: [pom.xml]
git_command: git pull
repo_configurations:
  - repo_name: billing
    builds:
      - directory: absent
        commands: ["never"]
      - directory: api
        commands: ["mvn package", "mvn verify"]
"#,
        )
        .unwrap();
        let mut registry = BuildTypeRegistry::new();
        registry.insert("maven", config);
        let runner = MockRunner::new();

        let entry = builder(registry, &runner).build(&path, "default", None).await;

        assert_eq!(entry.status, BuildStatus::Success);
        assert_eq!(runner.commands(), vec!["mvn package", "mvn verify"]);
        assert!(runner
            .get_invocations()
            .iter()
            .all(|i| i.cwd == path.join("api")));
        assert_eq!(entry.warnings.len(), 1);
        assert!(entry.warnings[0].contains("absent"));
    }

    #[tokio::test]
    async fn test_failure_in_first_block_abandons_later_blocks() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "mono", &["pom.xml"]);
        fs::create_dir_all(path.join("a")).unwrap();
        fs::create_dir_all(path.join("b")).unwrap();
        let config = BuildTypeConfig::from_yaml(
            "indicators: [pom.xml]\nrepo_configurations:\n  - builds:\n      - directory: a\n        commands: [\"build a\"]\n      - directory: b\n        commands: [\"build b\"]\n",
        )
        .unwrap();
        let mut registry = BuildTypeRegistry::new();
        registry.insert("maven", config);
        let runner = MockRunner::new().fail("build a", 1, "broken");

        let entry = builder(registry, &runner).build(&path, "default", None).await;

        assert_eq!(entry.status, BuildStatus::Failed);
        assert_eq!(runner.commands(), vec!["build a"]);
    }

    #[tokio::test]
    async fn test_streaming_can_be_disabled() {
        let temp = tempdir().unwrap();
        let path = project(&temp, "app", &["pom.xml"]);
        let runner = MockRunner::new();

        builder(registry(), &runner)
            .with_streaming(false)
            .build(&path, "default", None)
            .await;

        assert!(runner.get_invocations().iter().all(|i| !i.stream));
    }
}
