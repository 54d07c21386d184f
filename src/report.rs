//! Build summary document.
//!
//! The text summary is rendered with handlebars; `parse_statuses` reads the
//! `Project:`/`Status:` lines back out of it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::{json, Value};

use crate::build_log::{BuildLog, BuildStatus};

const RULE: &str = "============================================================";

const SUMMARY_TEMPLATE: &str = r#"Build Summary Report
{{rule}}
Started: {{started_at}}
Finished: {{finished_at}}

{{#if environment}}
Environment
{{#each environment}}
{{this}}
{{/each}}
{{rule}}

{{/if}}
{{#each profile_errors}}
Profile {{profile}} not run: {{message}}
{{/each}}
{{#each entries}}
Project: {{project}}
Profile: {{profile}}
Type: {{project_type}}
Status: {{status}}
{{#each commands}}
  {{#if advisory}}(advisory) {{/if}}[{{directory}}] {{command}} (exit {{exit_code}})
{{/each}}
{{#each warnings}}
  Warning: {{this}}
{{/each}}
{{#if details}}
Details: {{details}}
{{/if}}

{{/each}}
{{#each errors}}
Orchestrator error in {{profile}}/{{project}}: {{message}}
{{/each}}
{{rule}}
Success: {{success}}  Failed: {{failed}}  Skipped: {{skipped}}  Errors: {{error_count}}
End of report
"#;

/// Indent every line after the first so multi-line text (captured stderr,
/// folded YAML commands) never starts a line with a field label
fn indent_continuation(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join("\n    ")
}

fn context(log: &BuildLog) -> Value {
    let entries: Vec<Value> = log
        .entries
        .iter()
        .map(|entry| {
            json!({
                "project": entry.project,
                "profile": entry.profile,
                "project_type": entry.project_type.as_deref().unwrap_or("unknown"),
                "status": entry.status.to_string(),
                "commands": entry.commands.iter().map(|c| json!({
                    "command": indent_continuation(&c.command),
                    "directory": c.directory.display().to_string(),
                    "exit_code": c.exit_code,
                    "advisory": c.advisory,
                })).collect::<Vec<_>>(),
                "warnings": entry
                    .warnings
                    .iter()
                    .map(|w| indent_continuation(w))
                    .collect::<Vec<_>>(),
                "details": entry.details.as_deref().map(indent_continuation),
            })
        })
        .collect();

    json!({
        "rule": RULE,
        "started_at": log.started_at.to_rfc3339(),
        "finished_at": chrono::Utc::now().to_rfc3339(),
        "environment": log.environment,
        "profile_errors": log.profile_errors,
        "entries": entries,
        "errors": log.errors,
        "success": log.count(BuildStatus::Success),
        "failed": log.count(BuildStatus::Failed),
        "skipped": log.count(BuildStatus::Skipped),
        "error_count": log.errors.len(),
    })
}

/// Render the text summary
pub fn render_summary(log: &BuildLog) -> Result<String> {
    let mut handlebars = Handlebars::new();
    // Plain text report
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string("summary", SUMMARY_TEMPLATE)
        .context("Failed to compile summary template")?;

    handlebars
        .render("summary", &context(log))
        .context("Failed to render summary")
}

pub fn write_summary(log: &BuildLog, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let summary = render_summary(log)?;
    fs::write(path, summary)
        .with_context(|| format!("Failed to write summary: {}", path.display()))
}

/// Write the whole log as pretty JSON
pub fn write_json(log: &BuildLog, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(log).context("Failed to serialize build log")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Read `(project, status)` pairs back out of a rendered summary.
///
/// A `Status:` line only counts straight after its entry's `Type:` line.
pub fn parse_statuses(summary: &str) -> Vec<(String, BuildStatus)> {
    let mut statuses = Vec::new();
    let mut current: Option<String> = None;
    let mut previous = "";

    for line in summary.lines() {
        if let Some(project) = line.strip_prefix("Project: ") {
            current = Some(project.trim().to_string());
        } else if let Some(status) = line.strip_prefix("Status: ") {
            if previous.starts_with("Type: ") {
                if let (Some(project), Ok(status)) = (current.take(), status.parse()) {
                    statuses.push((project, status));
                }
            }
        }
        previous = line;
    }

    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_log::{ExecutedCommand, LogEntry, OrchestratorError, ProfileError};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn entry(project: &str, status: BuildStatus) -> LogEntry {
        let mut entry = LogEntry::new(project, "default");
        entry.status = status;
        entry
    }

    fn sample_log() -> BuildLog {
        let mut ok = entry("app1", BuildStatus::Success);
        ok.project_type = Some("maven".into());
        ok.commands.push(ExecutedCommand {
            command: "mvn -q package && echo <done>".into(),
            directory: PathBuf::from("/w/app1"),
            exit_code: 0,
            advisory: false,
        });

        let mut failed = entry("app2", BuildStatus::Failed);
        failed.project_type = Some("node".into());
        failed.details = Some("command `npm test` failed with exit code 1".into());
        failed.warnings.push("git command `git pull` failed".into());

        let mut skipped = entry("docs", BuildStatus::Skipped);
        skipped.details = Some("unknown project type".into());

        BuildLog {
            environment: vec!["JAVA_HOME: not set".into()],
            entries: vec![ok, failed, skipped],
            profile_errors: vec![ProfileError {
                profile: "mobile".into(),
                message: "base directory missing".into(),
            }],
            errors: vec![OrchestratorError {
                profile: "default".into(),
                project: "crash".into(),
                message: "build task crashed".into(),
            }],
            ..BuildLog::default()
        }
    }

    #[test]
    fn test_success_round_trips_through_summary() {
        let mut log = BuildLog::default();
        log.entries.push(entry("app1", BuildStatus::Success));

        let summary = render_summary(&log).unwrap();
        assert_eq!(
            parse_statuses(&summary),
            vec![("app1".to_string(), BuildStatus::Success)]
        );
    }

    #[test]
    fn test_summary_contents() {
        let summary = render_summary(&sample_log()).unwrap();

        assert!(summary.starts_with("Build Summary Report"));
        assert!(summary.contains("JAVA_HOME: not set"));
        assert!(summary.contains("Type: maven"));
        assert!(summary.contains("[/w/app1] mvn -q package && echo <done> (exit 0)"));
        assert!(summary.contains("Warning: git command `git pull` failed"));
        assert!(summary.contains("Details: unknown project type"));
        assert!(summary.contains("Profile mobile not run: base directory missing"));
        assert!(summary.contains("Orchestrator error in default/crash"));
        assert!(summary.contains("Success: 1  Failed: 1  Skipped: 1  Errors: 1"));
        assert!(summary.trim_end().ends_with("End of report"));
    }

    #[test]
    fn test_parse_statuses_all_entries() {
        let summary = render_summary(&sample_log()).unwrap();
        assert_eq!(
            parse_statuses(&summary),
            vec![
                ("app1".to_string(), BuildStatus::Success),
                ("app2".to_string(), BuildStatus::Failed),
                ("docs".to_string(), BuildStatus::Skipped),
            ]
        );
    }

    #[test]
    fn test_multiline_details_do_not_break_parsing() {
        let mut failed = entry("api", BuildStatus::Failed);
        failed.details = Some(
            "command `make` failed with exit code 2\nProject: bogus\nStatus: Success".into(),
        );
        failed.warnings.push("git pull failed\nStatus: Skipped".into());
        let mut log = BuildLog::default();
        log.entries.push(failed);
        log.entries.push(entry("web", BuildStatus::Success));

        let summary = render_summary(&log).unwrap();
        assert!(summary.contains("\n    Project: bogus"));
        assert_eq!(
            parse_statuses(&summary),
            vec![
                ("api".to_string(), BuildStatus::Failed),
                ("web".to_string(), BuildStatus::Success),
            ]
        );
    }

    #[test]
    fn test_status_without_type_line_ignored() {
        let text = "Project: a\nProfile: p\nType: maven\nStatus: Success\n\nProject: b\nStatus: Failed\n";
        assert_eq!(
            parse_statuses(text),
            vec![("a".to_string(), BuildStatus::Success)]
        );
    }

    #[test]
    fn test_unknown_type_rendered() {
        let mut log = BuildLog::default();
        log.entries.push(entry("docs", BuildStatus::Skipped));
        assert!(render_summary(&log).unwrap().contains("Type: unknown"));
    }

    #[test]
    fn test_write_summary_and_json() {
        let temp = tempdir().unwrap();
        let log = sample_log();

        let summary_path = temp.path().join("out").join("build_summary.log");
        write_summary(&log, &summary_path).unwrap();
        let written = fs::read_to_string(&summary_path).unwrap();
        assert_eq!(parse_statuses(&written).len(), 3);

        let json_path = temp.path().join("build_summary.json");
        write_json(&log, &json_path).unwrap();
        let parsed: BuildLog =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.entries, log.entries);
    }
}
