//! LLDB init files
//!
//! Xcode's debugger reads `~/.lldbinit-Xcode` (or `~/.lldbinit`) once per
//! launch. That file gets a marked block sourcing the bridge's own
//! `~/.lldbinit-xcbazel`, which is rewritten after every build so new
//! source maps apply without restarting Xcode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const BLOCK_START: &str = "# <XCBAZEL> LLDB bridge [:";
pub const BLOCK_END: &str = "# ]: <XCBAZEL> LLDB bridge";

/// First line of the generated `~/.lldbinit-xcbazel`.
pub const LLDBINIT_HEADER: &str = "# This file is autogenerated by xcbazel and should not be edited.\n";

/// Outcome of editing the primary lldbinit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStatus {
    Changed,
    Unchanged,
}

/// The lldbinit Xcode reads: `~/.lldbinit-Xcode` when present, else
/// `~/.lldbinit`.
pub fn primary_lldbinit(home: &Path) -> PathBuf {
    let xcode = home.join(".lldbinit-Xcode");
    if xcode.is_file() {
        xcode
    } else {
        home.join(".lldbinit")
    }
}

/// The marked block that sources `lldbinit`.
pub fn source_block(lldbinit: &Path) -> String {
    format!(
        "{BLOCK_START}\n\
         # This was autogenerated by xcbazel in order to modify LLDB source-maps at build time.\n\
         command source {}\n\
         {BLOCK_END}\n",
        lldbinit.display()
    )
}

/// `content` without any bridge block, complete or truncated.
fn strip_block(content: &str) -> String {
    let mut kept = String::with_capacity(content.len());
    let mut in_block = false;
    for line in content.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if in_block {
            if bare == BLOCK_END {
                in_block = false;
            }
            continue;
        }
        if bare == BLOCK_START {
            in_block = true;
            continue;
        }
        kept.push_str(line);
    }
    kept
}

fn read_if_exists(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Make sure `primary` ends with the block sourcing `lldbinit`.
pub fn add_source_block(primary: &Path, lldbinit: &Path) -> io::Result<BootstrapStatus> {
    let block = source_block(lldbinit);
    let existing = read_if_exists(primary)?.unwrap_or_default();
    if existing.contains(&block) {
        return Ok(BootstrapStatus::Unchanged);
    }

    let mut content = strip_block(&existing);
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&block);
    fs::write(primary, content)?;
    debug!(path = %primary.display(), "linked bridge lldbinit");
    Ok(BootstrapStatus::Changed)
}

/// Remove the bridge block from `primary`, deleting the file when nothing
/// else is left in it.
pub fn remove_source_block(primary: &Path) -> io::Result<BootstrapStatus> {
    let Some(existing) = read_if_exists(primary)? else {
        return Ok(BootstrapStatus::Unchanged);
    };
    let content = strip_block(&existing);
    if content == existing {
        return Ok(BootstrapStatus::Unchanged);
    }
    if content.trim().is_empty() {
        fs::remove_file(primary)?;
    } else {
        fs::write(primary, content)?;
    }
    debug!(path = %primary.display(), "unlinked bridge lldbinit");
    Ok(BootstrapStatus::Changed)
}

/// What `~/.lldbinit-xcbazel` should do with `target.source-map`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMap {
    /// Paths in the debug info already match Xcode's.
    Clear,
    /// `(build path prefix, Xcode path)` pairs.
    Set(Vec<(String, String)>),
}

/// Contents of the bridge lldbinit.
pub fn render_lldbinit(source_map: &SourceMap, project_name: &str, epilogue: Option<&Path>) -> String {
    let mut out = String::from(LLDBINIT_HEADER);
    match source_map {
        SourceMap::Clear => out.push_str("settings clear target.source-map\n"),
        SourceMap::Set(maps) => {
            out.push_str(&format!(
                "# This maps file paths used by Bazel to those used by {project_name:?}.\n"
            ));
            let pairs: Vec<String> = maps
                .iter()
                .map(|(from, to)| format!("\"{from}\" \"{to}\""))
                .collect();
            out.push_str(&format!("settings set target.source-map {}\n", pairs.join(" ")));
        }
    }
    if let Some(epilogue) = epilogue {
        out.push_str(&format!("command source {}\n", epilogue.display()));
    }
    out
}
