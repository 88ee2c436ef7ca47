//! Generated header links
//!
//! Xcode indexes headers Bazel generates through symlinks under
//! `<bazel workspace root>/xcbazel-includes/x/x/`. The two `x` components
//! keep the include tree as deep as Bazel's own output tree so relative
//! includes resolve the same way from both.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::descriptor::OutputDescriptor;

/// Name of the include tree directory under the build workspace root.
pub const INCLUDES_DIR: &str = "xcbazel-includes";

/// Errors from generated header installation
#[derive(Debug, Error)]
pub enum GenfilesError {
    #[error("failed to link generated header {link}: {source}")]
    Link {
        link: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to reset {path}: {source}")]
    Reset {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Root of the include tree for `bazel_workspace_root`.
pub fn includes_root(bazel_workspace_root: &Path) -> PathBuf {
    bazel_workspace_root.join(INCLUDES_DIR)
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Recreate the include tree from every descriptor's `generated_sources`.
///
/// Declared outputs Bazel never materialized are skipped. Returns the
/// number of links created.
pub fn install_generated_headers(
    bazel_workspace_root: &Path,
    descriptors: &[OutputDescriptor],
) -> Result<usize, GenfilesError> {
    let root = includes_root(bazel_workspace_root);
    let reset = || -> io::Result<()> {
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)
    };
    reset().map_err(|source| GenfilesError::Reset {
        path: root.clone(),
        source,
    })?;

    let link_root = root.join("x").join("x");
    let mut linked = 0;
    for source in descriptors.iter().flat_map(|d| d.generated_sources.iter()) {
        let real = bazel_workspace_root.join(&source.0);
        if !real.exists() {
            trace!(path = %real.display(), "generated source was never created");
            continue;
        }
        let link = link_root.join(&source.1);

        let make_link = || -> io::Result<()> {
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            // symlink_metadata also sees dangling links.
            if fs::symlink_metadata(&link).is_ok() {
                fs::remove_file(&link)?;
            }
            symlink(&real, &link)
        };
        make_link().map_err(|e| GenfilesError::Link {
            link: link.clone(),
            source: e,
        })?;
        linked += 1;
    }

    debug!(linked, root = %root.display(), "installed generated headers");
    Ok(linked)
}
