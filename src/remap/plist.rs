//! Per-UUID dSYM plists
//!
//! LLDB reads `<dSYM>/Contents/Resources/<UUID>.plist` when it loads a
//! binary with that UUID and applies the path remapping it contains, so the
//! mapping travels with the dSYM instead of living in a global file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::install::DsymSlice;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Plist body remapping every `(from, to)` pair. The first pair also fills
/// the single-path `DBGBuildSourcePath`/`DBGSourcePath` keys.
pub fn render_uuid_plist(maps: &[(String, String)]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
         \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
         <plist version=\"1.0\">\n<dict>\n\
         \t<key>DBGVersion</key>\n\t<string>3</string>\n",
    );
    if let Some((from, to)) = maps.first() {
        out.push_str(&format!(
            "\t<key>DBGBuildSourcePath</key>\n\t<string>{}</string>\n\
             \t<key>DBGSourcePath</key>\n\t<string>{}</string>\n",
            escape(from),
            escape(to)
        ));
    }
    out.push_str("\t<key>DBGSourcePathRemapping</key>\n\t<dict>\n");
    for (from, to) in maps {
        out.push_str(&format!(
            "\t\t<key>{}</key>\n\t\t<string>{}</string>\n",
            escape(from),
            escape(to)
        ));
    }
    out.push_str("\t</dict>\n</dict>\n</plist>\n");
    out
}

/// Write one plist per slice of `dsym`. Returns the files written.
pub fn write_uuid_plists(
    dsym: &Path,
    slices: &[DsymSlice],
    maps: &[(String, String)],
) -> io::Result<Vec<PathBuf>> {
    let resources = dsym.join("Contents").join("Resources");
    fs::create_dir_all(&resources)?;
    let body = render_uuid_plist(maps);

    let mut written = Vec::with_capacity(slices.len());
    for slice in slices {
        let path = resources.join(format!("{}.plist", slice.uuid));
        fs::write(&path, &body)?;
        written.push(path);
    }
    Ok(written)
}
