//! Rewriting of build tool output for Xcode's issue parser

use std::path::{Path, PathBuf};

use regex_lite::Regex;

const BAZEL_MESSAGE_PATTERN: &str = r"^(?:DEBUG|WARNING): ([^:]+:\d+:(?:\d+:)?)\s+(.+)";
const RELATIVE_LOCATION_PATTERN: &str = r"^([^/][^:]+):\d+:";

/// Patches individual lines of build tool output.
///
/// Bazel prints `DEBUG:`/`WARNING:` messages with a location Xcode does not
/// recognize, and relative paths that only make sense from the workspace
/// root. Both are rewritten so the issue navigator can link them.
#[derive(Debug, Clone)]
pub struct OutputPatcher {
    message: Regex,
    relative_location: Option<(Regex, PathBuf)>,
}

impl OutputPatcher {
    /// `main_group_path` is where Xcode resolves relative paths from; they
    /// only need prefixing when it differs from `project_dir`.
    pub fn new(project_dir: &Path, main_group_path: &Path) -> Result<Self, regex_lite::Error> {
        let relative_location = if main_group_path != project_dir {
            Some((
                Regex::new(RELATIVE_LOCATION_PATTERN)?,
                main_group_path.to_path_buf(),
            ))
        } else {
            None
        };
        Ok(Self {
            message: Regex::new(BAZEL_MESSAGE_PATTERN)?,
            relative_location,
        })
    }

    pub fn patch_line(&self, line: &str) -> String {
        let line = self.message.replace(line, "$1 warning: $2");
        match &self.relative_location {
            Some((pattern, prefix)) if pattern.is_match(&line) => {
                format!("{}/{}", prefix.display(), line)
            }
            _ => line.into_owned(),
        }
    }

    /// Split `text` into lines and patch each of them.
    pub fn patch(&self, text: &str) -> Vec<String> {
        text.lines().map(|line| self.patch_line(line)).collect()
    }
}
