//! Debugger path remapping
//!
//! Bazel compiles in its execution root, Xcode shows sources from the
//! workspace. The mapping between the two is handed to LLDB globally through
//! `~/.lldbinit-xcbazel` and per binary through plists inside each dSYM.

pub mod lldbinit;
pub mod plist;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::install::DsymSlice;
use crate::report::Diagnostics;

pub use lldbinit::{
    add_source_block, primary_lldbinit, remove_source_block, render_lldbinit, BootstrapStatus,
    SourceMap, LLDBINIT_HEADER,
};
pub use plist::{render_uuid_plist, write_uuid_plists};

/// Writes the source mappings of one build where LLDB picks them up.
#[derive(Debug, Clone)]
pub struct DebugPathRemapper {
    home: PathBuf,
    lldbinit: PathBuf,
    epilogue: PathBuf,
}

impl DebugPathRemapper {
    pub fn new(home: PathBuf, lldbinit: PathBuf, epilogue: PathBuf) -> Self {
        Self {
            home,
            lldbinit,
            epilogue,
        }
    }

    pub fn lldbinit_path(&self) -> &Path {
        &self.lldbinit
    }

    /// Link the bridge lldbinit from the one Xcode reads.
    pub fn bootstrap(&self) -> io::Result<BootstrapStatus> {
        add_source_block(&primary_lldbinit(&self.home), &self.lldbinit)
    }

    /// Undo [`bootstrap`](Self::bootstrap).
    pub fn remove_bootstrap(&self) -> io::Result<BootstrapStatus> {
        remove_source_block(&primary_lldbinit(&self.home))
    }

    /// Rewrite `~/.lldbinit-xcbazel`.
    ///
    /// With `clear` set the source map is reset, because prefix maps or dSYM
    /// plists already fixed the paths. Otherwise `maps` are installed; with
    /// no mappings a warning is emitted and breakpoints by file may not bind.
    pub fn update_lldbinit(
        &self,
        clear: bool,
        maps: &[(String, String)],
        project_name: &str,
        diag: &mut dyn Diagnostics,
    ) -> io::Result<()> {
        self.bootstrap()?;

        let epilogue = self.epilogue.is_file().then_some(self.epilogue.as_path());
        let source_map = if clear {
            SourceMap::Clear
        } else if maps.is_empty() {
            diag.warning(&format!(
                "Extracted 0 source paths from {project_name:?}. File-based breakpoints may not work."
            ));
            fs::write(&self.lldbinit, LLDBINIT_HEADER)?;
            return Ok(());
        } else {
            SourceMap::Set(maps.to_vec())
        };

        fs::write(&self.lldbinit, render_lldbinit(&source_map, project_name, epilogue))?;
        debug!(path = %self.lldbinit.display(), ?source_map, "updated lldbinit");
        Ok(())
    }

    /// Embed `maps` into `dsym` for each of its slices.
    pub fn remap_dsym(
        &self,
        dsym: &Path,
        slices: &[DsymSlice],
        maps: &[(String, String)],
    ) -> io::Result<Vec<PathBuf>> {
        if maps.is_empty() {
            return Ok(Vec::new());
        }
        write_uuid_plists(dsym, slices, maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CapturedDiagnostics;
    use tempfile::TempDir;

    fn remapper(home: &Path) -> DebugPathRemapper {
        DebugPathRemapper::new(
            home.to_path_buf(),
            home.join(".lldbinit-xcbazel"),
            home.join(".lldbinit-xcbazel-epilogue"),
        )
    }

    #[test]
    fn test_update_lldbinit_with_mappings() {
        let home = TempDir::new().unwrap();
        fs::write(home.path().join(".lldbinit-xcbazel-epilogue"), "").unwrap();
        let remapper = remapper(home.path());
        let mut diag = CapturedDiagnostics::default();

        remapper
            .update_lldbinit(
                false,
                &[("/exec".to_string(), "/src".to_string())],
                "App.xcodeproj",
                &mut diag,
            )
            .unwrap();

        let ours = fs::read_to_string(home.path().join(".lldbinit-xcbazel")).unwrap();
        assert!(ours.contains("settings set target.source-map \"/exec\" \"/src\""));
        assert!(ours.contains("command source"));
        let primary = fs::read_to_string(home.path().join(".lldbinit")).unwrap();
        assert!(primary.contains(".lldbinit-xcbazel"));
        assert!(diag.warnings.is_empty());
    }

    #[test]
    fn test_update_lldbinit_without_mappings_warns() {
        let home = TempDir::new().unwrap();
        let mut diag = CapturedDiagnostics::default();

        remapper(home.path())
            .update_lldbinit(false, &[], "App.xcodeproj", &mut diag)
            .unwrap();

        assert_eq!(diag.warnings.len(), 1);
        let ours = fs::read_to_string(home.path().join(".lldbinit-xcbazel")).unwrap();
        assert_eq!(ours, LLDBINIT_HEADER);
    }

    #[test]
    fn test_clear_source_map() {
        let home = TempDir::new().unwrap();
        let mut diag = CapturedDiagnostics::default();

        remapper(home.path())
            .update_lldbinit(true, &[("/a".into(), "/b".into())], "App.xcodeproj", &mut diag)
            .unwrap();

        let ours = fs::read_to_string(home.path().join(".lldbinit-xcbazel")).unwrap();
        assert!(ours.contains("settings clear target.source-map"));
        assert!(!ours.contains("command source"));
    }
}
