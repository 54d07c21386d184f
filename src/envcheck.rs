//! Toolchain probe printed before a run and kept in the summary

use std::path::Path;

use tracing::info;

use crate::config::EnvCheckConfig;
use crate::env_vars::EnvOverrides;
use crate::runner::CommandRunner;

/// Describe configured variables and tools as report lines.
///
/// Variables and `PATH` lookups see the overrides children will get. Version
/// commands go through `runner`, so they see them too. Nothing here fails:
/// problems become lines.
pub async fn check_environment(
    config: &EnvCheckConfig,
    overrides: &EnvOverrides,
    runner: &dyn CommandRunner,
    cwd: &Path,
) -> Vec<String> {
    let mut lines = Vec::new();

    for name in &config.variables {
        let value = overrides.get(name).unwrap_or_else(|| "not set".to_string());
        lines.push(format!("{}: {}", name, value));
    }

    let search_path = overrides
        .effective_path()
        .ok()
        .flatten()
        .or_else(|| std::env::var_os("PATH"));

    for tool in &config.tools {
        let location = which::which_in(&tool.name, search_path.as_ref(), cwd)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| format!("{} not found in PATH", tool.name));
        lines.push(format!("{} location: {}", tool.name, location));

        if let Some(ref command) = tool.version_command {
            let result = runner.run(command, cwd, false).await;
            if result.success() {
                // java -version writes to stderr
                let output = [result.stdout.trim(), result.stderr.trim()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n");
                lines.push(format!("{} version:\n{}", tool.name, output));
            } else {
                lines.push(format!(
                    "unable to detect {} version (exit code {})",
                    tool.name, result.exit_code
                ));
            }
        }
    }

    for line in &lines {
        info!("{}", line);
    }
    lines
}
