//! Locating embedded bundles inside an installed bundle

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

/// Subfolders bundles of each kind live in.
const CONVENTIONAL_SUBFOLDERS: &[(&str, &str)] = &[
    ("appex", "PlugIns"),
    ("framework", "Frameworks"),
    ("app", "Watch"),
    ("xpc", "XPCServices"),
];

/// Folder an embedded bundle with extension `ext` (no dot) is placed in.
pub fn conventional_subfolder(ext: &str) -> Option<&'static str> {
    CONVENTIONAL_SUBFOLDERS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, folder)| *folder)
}

/// Find `full_name` inside the bundle at `root`, looking through nested
/// bundles as well (e.g. a framework inside a watch app's extension).
pub fn find_embedded_bundle(root: &Path, full_name: &str, ext: &str) -> Option<PathBuf> {
    let folder = conventional_subfolder(ext)?;
    let mut pending = vec![root.to_path_buf()];

    while let Some(bundle) = pending.pop() {
        let candidate = bundle.join(folder).join(full_name);
        trace!(candidate = %candidate.display(), "looking for embedded bundle");
        if candidate.is_dir() {
            return Some(candidate);
        }

        for (_, sub) in CONVENTIONAL_SUBFOLDERS {
            let Ok(entries) = fs::read_dir(bundle.join(sub)) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.file_type().is_ok_and(|t| t.is_dir()) {
                    pending.push(entry.path());
                }
            }
        }
    }
    None
}
