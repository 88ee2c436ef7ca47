//! Output descriptor files
//!
//! The bridge's Bazel aspect writes one JSON descriptor per built target
//! into the `xcbazel-outputs` output group. It names the primary artifact
//! and everything needed to reshape it into what Xcode expects.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Result type for descriptor loading
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// Descriptor errors
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to load output map \"{path}\". {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Failed to find an output artifact in output map \"{0}\"")]
    MissingArtifact(PathBuf),
}

impl DescriptorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DescriptorError::Load { .. } => 600,
            DescriptorError::MissingArtifact(_) => 601,
        }
    }
}

/// A bundle nested inside the primary one (extension, framework, watch app).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmbeddedBundle {
    #[serde(default)]
    pub bundle_name: String,
    /// Includes the leading dot, e.g. `.appex`.
    #[serde(default)]
    pub bundle_extension: String,
    /// Older aspects only report the combined name.
    #[serde(default)]
    pub bundle_full_name: Option<String>,
    #[serde(default)]
    pub archive_root: Option<PathBuf>,
    #[serde(default)]
    pub has_dsym: bool,
}

impl EmbeddedBundle {
    /// `bundle_name` + `bundle_extension`, e.g. `Widget.appex`.
    pub fn full_name(&self) -> String {
        match &self.bundle_full_name {
            Some(name) => name.clone(),
            None => format!("{}{}", self.bundle_name, self.bundle_extension),
        }
    }

    /// Extension without the leading dot.
    pub fn extension(&self) -> &str {
        let ext = if self.bundle_extension.is_empty() {
            self.bundle_full_name
                .as_deref()
                .and_then(|n| n.rfind('.').map(|i| &n[i..]))
                .unwrap_or("")
        } else {
            &self.bundle_extension
        };
        ext.trim_start_matches('.')
    }
}

/// A `(real_path, link_path)` pair for a generated header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedSource(pub String, pub String);

/// Parsed descriptor file. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputDescriptor {
    #[serde(default)]
    pub(crate) artifact: Option<PathBuf>,
    /// Older aspects list artifacts; only the first one is used.
    #[serde(default)]
    pub(crate) artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub archive_root: Option<PathBuf>,
    #[serde(default)]
    pub bundle_name: Option<String>,
    #[serde(default)]
    pub bundle_extension: Option<String>,
    #[serde(default)]
    pub embedded_bundles: Vec<EmbeddedBundle>,
    #[serde(default)]
    pub has_dsym: bool,
    #[serde(default)]
    pub generated_sources: Vec<GeneratedSource>,
}

impl OutputDescriptor {
    pub fn load(path: &Path) -> DescriptorResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| DescriptorError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&contents).map_err(|e| DescriptorError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// The primary artifact, `None` when the descriptor names none.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact
            .as_deref()
            .or_else(|| self.artifacts.first().map(PathBuf::as_path))
    }

    /// Load every descriptor, failing on the first unreadable one.
    pub fn load_all(paths: &[PathBuf]) -> DescriptorResult<Vec<Self>> {
        paths.iter().map(|p| Self::load(p)).collect()
    }
}
