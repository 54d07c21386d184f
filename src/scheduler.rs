//! Drives profiles: scan, split into priority and remainder, build.
//!
//! Priority projects build one at a time in declared order. The remainder
//! goes to a bounded pool afterwards. Each build runs in its own task so a
//! panic is reported against that project and nothing else.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, instrument, warn};

use crate::build_log::{LogCollector, LogEntry, OrchestratorError, ProfileError};
use crate::builder::Builder;
use crate::config::BuildProfile;
use crate::projects::{list_projects, project_name};

/// A profile's projects split by scheduling class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Built sequentially, in this order
    pub priority: Vec<PathBuf>,
    /// Built concurrently, no ordering
    pub remainder: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Split `projects` by `build_priority`. Unknown and repeated priority names
/// produce warnings and are otherwise ignored.
pub fn partition(projects: Vec<PathBuf>, build_priority: &[String]) -> Partition {
    let mut result = Partition::default();
    let mut remaining = projects;
    let mut seen = HashSet::new();

    for name in build_priority {
        if !seen.insert(name.as_str()) {
            result
                .warnings
                .push(format!("Priority project '{}' listed more than once", name));
            continue;
        }
        match remaining.iter().position(|p| project_name(p) == *name) {
            Some(index) => result.priority.push(remaining.remove(index)),
            None => result
                .warnings
                .push(format!("Priority project '{}' not found or excluded", name)),
        }
    }

    result.remainder = remaining;
    result
}

pub struct Scheduler {
    builder: Arc<Builder>,
    workers: usize,
}

impl Scheduler {
    pub fn new(builder: Arc<Builder>, workers: usize) -> Self {
        Self {
            builder,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run each profile in turn, recording into `log`
    pub async fn run(&self, profiles: &[BuildProfile], log: &LogCollector) {
        for profile in profiles {
            self.run_profile(profile, log).await;
        }
    }

    /// Run one profile. A scan failure is recorded and ends only this profile.
    #[instrument(skip_all, fields(profile = %profile.name))]
    pub async fn run_profile(&self, profile: &BuildProfile, log: &LogCollector) {
        let projects = match list_projects(&profile.base_directory, &profile.filter) {
            Ok(projects) => projects,
            Err(e) => {
                error!(error = %e, "Skipping profile");
                log.push_profile_error(ProfileError {
                    profile: profile.name.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let partition = partition(projects, &profile.build_priority);
        for warning in &partition.warnings {
            warn!("{}", warning);
        }

        for path in partition.priority {
            info!(project = %project_name(&path), "Building priority project");
            record(log, self.spawn_build(path, profile).await);
        }

        if partition.remainder.is_empty() {
            return;
        }

        info!(
            count = partition.remainder.len(),
            workers = self.workers,
            "Building remaining projects in parallel"
        );
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set: JoinSet<Result<LogEntry, OrchestratorError>> = JoinSet::new();
        let mut projects: HashMap<Id, String> = HashMap::new();

        for path in partition.remainder {
            let permit = Arc::clone(&semaphore);
            let builder = Arc::clone(&self.builder);
            let profile_name = profile.name.clone();
            let project_type = profile.project_type.clone();
            let project = project_name(&path);
            let task_project = project.clone();

            let handle = join_set.spawn(async move {
                let _permit = permit.acquire().await.map_err(|e| OrchestratorError {
                    profile: profile_name.clone(),
                    project: task_project,
                    message: format!("Failed to acquire worker: {}", e),
                })?;
                isolated_build(builder, path, profile_name, project_type).await
            });
            projects.insert(handle.id(), project);
        }

        while let Some(result) = join_set.join_next_with_id().await {
            match result {
                Ok((_, outcome)) => record(log, outcome),
                Err(e) => record(log, Err(join_failure(&profile.name, &projects, &e))),
            }
        }
    }

    async fn spawn_build(
        &self,
        path: PathBuf,
        profile: &BuildProfile,
    ) -> Result<LogEntry, OrchestratorError> {
        isolated_build(
            Arc::clone(&self.builder),
            path,
            profile.name.clone(),
            profile.project_type.clone(),
        )
        .await
    }
}

/// Build in a dedicated task so a panic becomes an [`OrchestratorError`]
async fn isolated_build(
    builder: Arc<Builder>,
    path: PathBuf,
    profile: String,
    project_type: Option<String>,
) -> Result<LogEntry, OrchestratorError> {
    let project = project_name(&path);
    let task_profile = profile.clone();
    let handle = tokio::spawn(async move {
        builder
            .build(&path, &task_profile, project_type.as_deref())
            .await
    });

    handle.await.map_err(|e| OrchestratorError {
        profile,
        project,
        message: format!("build task crashed: {}", e),
    })
}

/// isolated_build catches panics itself, so this is a pool task that was
/// cancelled or panicked outside the build
fn join_failure(
    profile: &str,
    projects: &HashMap<Id, String>,
    error: &JoinError,
) -> OrchestratorError {
    OrchestratorError {
        profile: profile.to_string(),
        project: projects
            .get(&error.id())
            .cloned()
            .unwrap_or_else(|| "<unknown>".to_string()),
        message: format!("build task failed: {}", error),
    }
}

fn record(log: &LogCollector, outcome: Result<LogEntry, OrchestratorError>) {
    match outcome {
        Ok(entry) => {
            info!(project = %entry.project, status = %entry.status, "Finished");
            log.push(entry);
        }
        Err(e) => {
            error!(project = %e.project, "Failed to build {}: {}", e.project, e.message);
            log.push_error(e);
        }
    }
}
