//! dSYM bundles: naming and UUID extraction

use std::collections::BTreeSet;
use std::path::Path;

use regex_lite::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::descriptor::OutputDescriptor;
use crate::process::CommandRunner;

/// dSYM errors
#[derive(Debug, Error)]
pub enum DsymError {
    #[error("failed to run dwarfdump on {path}: {reason}")]
    Dwarfdump { path: String, reason: String },

    #[error("dwarfdump reported no UUIDs for {0}")]
    NoUuids(String),

    #[error("Failed to install dSYM \"{name}\": {reason}")]
    Install { name: String, reason: String },
}

impl DsymError {
    pub fn exit_code(&self) -> i32 {
        700
    }
}

/// One architecture slice of a dSYM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsymSlice {
    /// Uppercase, hyphenated.
    pub uuid: String,
    pub architecture: String,
}

/// dSYM bundle names to install: the one Xcode expects plus, when
/// collecting, one per embedded bundle that has debug symbols.
pub fn dsym_names(
    primary: &str,
    descriptors: &[OutputDescriptor],
    collect_embedded: bool,
) -> Vec<String> {
    let mut names = vec![primary.to_string()];
    if collect_embedded {
        let embedded: BTreeSet<String> = descriptors
            .iter()
            .flat_map(|d| d.embedded_bundles.iter())
            .filter(|b| b.has_dsym)
            .map(|b| format!("{}.dSYM", b.full_name()))
            .filter(|n| n != primary)
            .collect();
        names.extend(embedded);
    }
    names
}

/// Parse `dwarfdump --uuid` output.
///
/// Lines look like `UUID: 3B2F...-... (arm64) /path/App.app.dSYM/...`.
/// Lines whose identifier is not a valid UUID are ignored.
pub fn parse_dwarfdump_uuids(output: &str) -> Vec<DsymSlice> {
    let Ok(pattern) = Regex::new(r"UUID: (\S+) \((\S+)\) (.+)") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| {
            let uuid = Uuid::parse_str(&caps[1]).ok()?;
            Some(DsymSlice {
                uuid: uuid.hyphenated().to_string().to_uppercase(),
                architecture: caps[2].to_string(),
            })
        })
        .collect()
}

/// Run `xcrun dwarfdump --uuid` on `dsym`.
pub fn dsym_uuids(runner: &dyn CommandRunner, dsym: &Path) -> Result<Vec<DsymSlice>, DsymError> {
    let path = dsym.display().to_string();
    let args = vec!["dwarfdump".to_string(), "--uuid".to_string(), path.clone()];
    let out = runner.run("xcrun", &args).map_err(|e| DsymError::Dwarfdump {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    if !out.is_success() {
        return Err(DsymError::Dwarfdump {
            path,
            reason: format!("exit code {}: {}", out.exit_code, out.output.trim()),
        });
    }
    let slices = parse_dwarfdump_uuids(&out.output);
    if slices.is_empty() {
        return Err(DsymError::NoUuids(path));
    }
    Ok(slices)
}
