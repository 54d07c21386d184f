//! Per-project build records and the run-wide log that collects them

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one project build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Success => "Success",
            BuildStatus::Failed => "Failed",
            BuildStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Success" => Ok(BuildStatus::Success),
            "Failed" => Ok(BuildStatus::Failed),
            "Skipped" => Ok(BuildStatus::Skipped),
            other => Err(format!("unknown build status: {}", other)),
        }
    }
}

/// A command that was actually run for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedCommand {
    pub command: String,
    pub directory: PathBuf,
    pub exit_code: i32,
    /// Advisory commands (git) never change the project status
    #[serde(default)]
    pub advisory: bool,
}

/// Record of one project build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub project: String,
    pub profile: String,
    pub project_type: Option<String>,
    pub status: BuildStatus,
    pub commands: Vec<ExecutedCommand>,
    pub warnings: Vec<String>,
    /// Skip reason or failure details
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(project: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            profile: profile.into(),
            project_type: None,
            status: BuildStatus::Skipped,
            commands: Vec::new(),
            warnings: Vec::new(),
            details: None,
        }
    }
}

/// Something went wrong outside a project's own build (worker crash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorError {
    pub profile: String,
    pub project: String,
    pub message: String,
}

/// A profile that could not run at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileError {
    pub profile: String,
    pub message: String,
}

/// Everything a run produced, in the order it was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLog {
    pub started_at: DateTime<Utc>,
    pub environment: Vec<String>,
    pub entries: Vec<LogEntry>,
    pub profile_errors: Vec<ProfileError>,
    pub errors: Vec<OrchestratorError>,
}

impl Default for BuildLog {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            environment: Vec::new(),
            entries: Vec::new(),
            profile_errors: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl BuildLog {
    pub fn count(&self, status: BuildStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Whether any project failed or any worker crashed
    pub fn has_failures(&self) -> bool {
        self.count(BuildStatus::Failed) > 0 || !self.errors.is_empty()
    }

    pub fn entry(&self, project: &str) -> Option<&LogEntry> {
        self.entries.iter().find(|e| e.project == project)
    }
}

/// Append-only log shared by concurrent workers
#[derive(Debug, Default)]
pub struct LogCollector {
    inner: Mutex<BuildLog>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(environment: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(BuildLog {
                environment,
                ..BuildLog::default()
            }),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        self.lock().entries.push(entry);
    }

    pub fn push_error(&self, error: OrchestratorError) {
        self.lock().errors.push(error);
    }

    pub fn push_profile_error(&self, error: ProfileError) {
        self.lock().profile_errors.push(error);
    }

    pub fn into_log(self) -> BuildLog {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BuildLog> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_status_display_and_parse() {
        for status in [BuildStatus::Success, BuildStatus::Failed, BuildStatus::Skipped] {
            assert_eq!(status.to_string().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("Done".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_new_entry_defaults() {
        let entry = LogEntry::new("app", "default");
        assert_eq!(entry.status, BuildStatus::Skipped);
        assert!(entry.commands.is_empty());
        assert!(entry.project_type.is_none());
    }

    #[test]
    fn test_counts_and_failures() {
        let collector = LogCollector::new();
        let mut ok = LogEntry::new("a", "p");
        ok.status = BuildStatus::Success;
        collector.push(ok);
        collector.push(LogEntry::new("b", "p"));

        let log = collector.into_log();
        assert_eq!(log.count(BuildStatus::Success), 1);
        assert_eq!(log.count(BuildStatus::Skipped), 1);
        assert!(!log.has_failures());

        let collector = LogCollector::new();
        collector.push_error(OrchestratorError {
            profile: "p".into(),
            project: "c".into(),
            message: "panicked".into(),
        });
        assert!(collector.into_log().has_failures());
    }

    #[test]
    fn test_concurrent_append() {
        let collector = Arc::new(LogCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        collector.push(LogEntry::new(format!("p{}-{}", i, j), "all"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let collector = Arc::try_unwrap(collector).unwrap();
        assert_eq!(collector.into_log().entries.len(), 200);
    }
}
