//! Bazel command lines

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::process::CommandRunner;
use crate::report::{Diagnostics, Timer};

/// Everything needed to assemble one `bazel build` invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub bazel: PathBuf,
    pub startup_options: Vec<String>,
    pub build_options: Vec<String>,
    pub event_file: PathBuf,
    pub output_group: String,
    pub aspect: String,
    pub tool_tag: String,
    /// Ask rules_apple for dSYM bundles.
    pub generate_dsym: bool,
    /// Propagate embedded bundles' dSYMs and other extra outputs.
    pub collect_dsym: bool,
    pub targets: Vec<String>,
}

impl BuildRequest {
    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        let mut cmd = vec![self.bazel.display().to_string()];
        cmd.extend(self.startup_options.iter().cloned());
        cmd.push("build".to_string());
        cmd.extend(self.build_options.iter().cloned());
        cmd.extend([
            format!("--build_event_json_file={}", self.event_file.display()),
            format!("--output_groups={},default", self.output_group),
            "--aspects".to_string(),
            self.aspect.clone(),
            format!("--tool_tag={}", self.tool_tag),
        ]);
        if self.generate_dsym {
            cmd.push("--apple_generate_dsym".to_string());
        }
        if self.collect_dsym {
            cmd.push("--define=bazel_rules_apple.propagate_embedded_extra_outputs=1".to_string());
        }
        cmd.extend(self.targets.iter().cloned());
        cmd
    }
}

/// Ask Bazel for its execution root.
///
/// Returns `None` (after a warning) when the command fails or prints nothing
/// that looks like an execroot.
pub fn query_execution_root(
    runner: &dyn CommandRunner,
    bazel: &Path,
    diag: &mut dyn Diagnostics,
) -> Option<String> {
    let timer = Timer::start("Finding Bazel execution root");
    let args: Vec<String> = [
        "info",
        "execution_root",
        "--noshow_loading_progress",
        "--noshow_progress",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let bazel_name = bazel.display().to_string();
    let result = runner.run(&bazel_name, &args);
    timer.end();

    let output = match result {
        Ok(out) if out.is_success() => out.output,
        Ok(out) => {
            diag.warning(&format!(
                "{bazel_name} returned {} while finding the execution root",
                out.exit_code
            ));
            return None;
        }
        Err(e) => {
            diag.warning(&format!("failed to run {bazel_name} info: {e}"));
            return None;
        }
    };

    match output.lines().find(|line| line.contains("/execroot")) {
        Some(line) => {
            debug!(execroot = line.trim(), "found execution root");
            Some(line.trim().to_string())
        }
        None => {
            diag.warning(&format!(
                "{bazel_name} did not return a recognized /execroot path."
            ));
            None
        }
    }
}

fn parent_of(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Source path mappings from build paths to the paths Xcode shows.
///
/// The parent of the execution root maps to the parent of the workspace
/// root, which covers both `execroot/<name>/...` and external repositories.
pub fn source_maps(execution_root: Option<&str>, workspace_root: &Path) -> Vec<(String, String)> {
    let Some(execroot) = execution_root else {
        return Vec::new();
    };
    let workspace_parent = workspace_root
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    vec![(parent_of(execroot), workspace_parent)]
}
