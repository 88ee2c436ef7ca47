//! Shared fixtures for integration tests
//!
//! - Xcode build settings rooted in a temporary directory
//! - Archive and descriptor writers
//! - Executable shell scripts standing in for Bazel

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use xcbazel_bridge::XcodeEnv;
use zip::write::SimpleFileOptions;

/// Build settings of an iOS device build whose directories live under `root`.
pub fn xcode_vars(root: &Path) -> HashMap<String, String> {
    let products = root.join("DerivedData/Build/Products/Debug-iphoneos");
    let workspace = root.join("ws");
    let p = |path: &Path| path.display().to_string();
    [
        ("ACTION", String::new()),
        ("CONFIGURATION", "Debug".to_string()),
        ("CODESIGNING_FOLDER_PATH", p(&products.join("App.app"))),
        ("BUILT_PRODUCTS_DIR", p(&products)),
        ("TARGET_BUILD_DIR", p(&products)),
        ("FULL_PRODUCT_NAME", "App.app".to_string()),
        ("EXECUTABLE_PATH", "App.app/App".to_string()),
        ("WRAPPER_SUFFIX", ".app".to_string()),
        ("WRAPPER_EXTENSION", "app".to_string()),
        ("PLATFORM_NAME", "iphoneos".to_string()),
        ("PRODUCT_TYPE", "com.apple.product-type.application".to_string()),
        ("PROJECT_DIR", p(&workspace)),
        ("PROJECT_FILE_PATH", p(&workspace.join("App.xcodeproj"))),
        ("SDK_VERSION", "17.2".to_string()),
        ("CURRENT_ARCH", "arm64".to_string()),
        ("CODE_SIGNING_ALLOWED", "YES".to_string()),
        ("XCODE_VERSION_ACTUAL", "1520".to_string()),
        ("XCBAZEL_WR", p(&workspace)),
        ("XCBAZEL_DEBUG_PREFIX_MAP", "NO".to_string()),
        ("XCBAZEL_QUEUE_BUILDS", "NO".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// [`xcode_vars`] with `overrides` applied, parsed.
pub fn xcode_env(root: &Path, overrides: &[(&str, &str)]) -> XcodeEnv {
    let mut vars = xcode_vars(root);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    let workspace = root.join("ws");
    fs::create_dir_all(&workspace).unwrap();
    XcodeEnv::from_vars(&vars, workspace).unwrap()
}

/// Write a zip archive; names ending in `/` become directories.
pub fn write_zip(path: &Path, entries: &[(&str, &str, u32)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, contents, mode) in entries {
        let options = SimpleFileOptions::default().unix_permissions(*mode);
        if name.ends_with('/') {
            writer.add_directory(name.trim_end_matches('/'), options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Write a descriptor file and return its path.
pub fn write_descriptor(dir: &Path, name: &str, descriptor: serde_json::Value) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(&descriptor).unwrap()).unwrap();
    path
}

/// Set the modification time of a file or directory to `age` before now.
pub fn set_age(path: &Path, age: Duration) {
    let time = SystemTime::now() - age;
    File::open(path).unwrap().set_modified(time).unwrap();
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Every relative file path under `root`, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .display()
                .to_string()
        })
        .collect();
    files.sort();
    files
}
