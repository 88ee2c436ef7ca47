//! End-to-end bridge runs against a scripted Bazel
//!
//! The fake `bazel` appends a build event stream to the file named by
//! `--build_event_json_file`, exactly as the real client does, and records
//! its arguments for inspection.

#![cfg(unix)]

mod fixtures;

use std::fs;
use std::path::{Path, PathBuf};

use fixtures::{write_descriptor, write_script, xcode_env};
use serde_json::json;
use tempfile::TempDir;
use xcbazel_bridge::bridge::WORKSPACE_LINK;
use xcbazel_bridge::build::{event_file_path, BuildError};
use xcbazel_bridge::config::BridgeConfig;
use xcbazel_bridge::install::InstallMethod;
use xcbazel_bridge::process::{CommandOutput, MockRunner};
use xcbazel_bridge::symbol_cache::JsonSymbolCache;
use xcbazel_bridge::{
    Bridge, BridgeError, BridgeReport, BuildInvocation, CapturedDiagnostics, XcodeEnv,
};

/// A `bazel` that writes `events` (one JSON object per line) and exits with
/// `exit_code`.
fn fake_bazel(dir: &Path, events: &[String], exit_code: i32) -> PathBuf {
    let bazel = dir.join("tools/bazel");
    let args_file = dir.join("bazel-args.txt");
    let body = format!(
        r#"printf '%s\n' "$@" > '{args}'
for arg in "$@"; do
  case "$arg" in
    --build_event_json_file=*) events="${{arg#--build_event_json_file=}}" ;;
  esac
done
cat >> "$events" <<'END_OF_EVENTS'
{lines}
END_OF_EVENTS
exit {exit_code}
"#,
        args = args_file.display(),
        lines = events.join("\n"),
    );
    write_script(&bazel, &body);
    bazel
}

fn events_announcing(descriptor: &Path) -> Vec<String> {
    vec![
        json!({
            "id": {"started": {}},
            "children": [{"progress": {"opaqueCount": 0}}, {"namedSet": {"id": "0"}}]
        })
        .to_string(),
        json!({
            "id": {"progress": {"opaqueCount": 0}},
            "progress": {"stderr": "INFO: Build completed successfully\n"}
        })
        .to_string(),
        json!({
            "id": {"namedSet": {"id": "0"}},
            "namedSetOfFiles": {"files": [
                {"name": "App.xcbazelouts", "uri": format!("file://{}", descriptor.display())}
            ]}
        })
        .to_string(),
    ]
}

fn config_in(home: &Path) -> BridgeConfig {
    BridgeConfig {
        lldbinit_path: home.join(".lldbinit-xcbazel"),
        lldbinit_epilogue_path: home.join(".lldbinit-xcbazel-epilogue"),
        symbol_cache_path: home.join("symbol_cache.json"),
        lock_path: home.join("build.lock"),
        poll_interval_ms: 10,
        ..BridgeConfig::default()
    }
}

/// `ws/bazel-bin` pointing into a fake output base; returns the bin dir.
fn bazel_bin(root: &Path) -> PathBuf {
    let bin = root.join("output_base/execroot/ws/bazel-out/ios-dbg/bin");
    fs::create_dir_all(&bin).unwrap();
    std::os::unix::fs::symlink(&bin, root.join("ws/bazel-bin")).unwrap();
    bin
}

fn run(
    env: &XcodeEnv,
    config: &BridgeConfig,
    runner: &MockRunner,
    home: &Path,
    invocation: &BuildInvocation,
) -> (Result<BridgeReport, BridgeError>, CapturedDiagnostics) {
    let cache = JsonSymbolCache::new(config.symbol_cache_path.clone());
    let bridge = Bridge::new(config, env, runner, &cache, home.to_path_buf());
    let mut diag = CapturedDiagnostics::default();
    let result = bridge.run(invocation, &mut diag);
    (result, diag)
}

#[test]
fn test_full_build_installs_outputs() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let env = xcode_env(dir.path(), &[]);
    let bin = bazel_bin(dir.path());

    let artifact = bin.join("app/App.app");
    fs::create_dir_all(&artifact).unwrap();
    fs::write(artifact.join("App"), "binary").unwrap();
    fs::write(bin.join("app/gen.h"), "#define GENERATED 1\n").unwrap();
    let descriptor = write_descriptor(
        &bin.join("app"),
        "App.xcbazelouts",
        json!({
            "artifact": artifact,
            "bundle_name": "App",
            "bundle_extension": ".app",
            "generated_sources": [
                ["bazel-out/ios-dbg/bin/app/gen.h", "app/gen.h"],
                ["bazel-out/ios-dbg/bin/app/never.h", "app/never.h"]
            ],
        }),
    );

    let bazel = fake_bazel(dir.path(), &events_announcing(&descriptor), 0);
    let runner = MockRunner::new();
    runner.respond(
        &format!("{} info", bazel.display()),
        CommandOutput::success("/private/var/tmp/_bazel/abc/execroot/ws\n"),
    );
    let mut invocation = BuildInvocation::new(&bazel, vec!["//app:App".to_string()]);
    invocation.install_generated_artifacts = true;
    invocation.build_options = vec!["--jobs=4".to_string()];

    let config = config_in(&home);
    let (result, diag) = run(&env, &config, &runner, &home, &invocation);
    let report = result.unwrap();

    // The build itself.
    let args = fs::read_to_string(dir.path().join("bazel-args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(args.iter().position(|a| *a == "build"), Some(0));
    for expected in ["--compilation_mode=dbg", "--jobs=4", "--xcode_version=15.2", "//app:App"] {
        assert!(args.contains(&expected), "missing {expected} in {args:?}");
    }
    assert_eq!(report.descriptors, vec![descriptor]);
    assert!(diag.output.iter().any(|l| l.contains("Build completed successfully")));
    assert!(!event_file_path(&env.project_state_dir()).exists());

    // Workspace link.
    let ws_root = fs::canonicalize(dir.path().join("output_base/execroot/ws")).unwrap();
    assert_eq!(report.bazel_workspace_root.as_deref(), Some(ws_root.as_path()));
    assert_eq!(
        fs::read_link(env.workspace_root.join(WORKSPACE_LINK)).unwrap(),
        ws_root
    );

    // Installed outputs.
    let installed = report.installed.unwrap();
    assert_eq!(installed.method, InstallMethod::CopiedTree);
    assert_eq!(
        fs::read_to_string(env.artifact_output_path().join("App")).unwrap(),
        "binary"
    );
    assert_eq!(report.generated_headers, 1);
    assert!(ws_root.join("xcbazel-includes/x/x/app/gen.h").exists());

    // Debugger source map.
    let lldbinit = fs::read_to_string(&config.lldbinit_path).unwrap();
    assert!(lldbinit.contains("target.source-map"), "{lldbinit}");
    let primary = fs::read_to_string(home.join(".lldbinit")).unwrap();
    assert!(primary.contains(&config.lldbinit_path.display().to_string()));
}

#[test]
fn test_success_without_descriptors_fails() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().join("home");
    let env = xcode_env(dir.path(), &[]);
    let events = vec![json!({"id": {"started": {}}, "children": []}).to_string()];
    let bazel = fake_bazel(dir.path(), &events, 0);

    let runner = MockRunner::new();
    let invocation = BuildInvocation::new(&bazel, vec!["//app:App".to_string()]);
    let (result, _) = run(&env, &config_in(&home), &runner, &home, &invocation);
    let err = result.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::Build(BuildError::NoOutputDescriptors(_))
    ));
    assert_eq!(err.exit_code(), 1);
    assert!(
        event_file_path(&env.project_state_dir()).exists(),
        "event file kept for diagnosis"
    );
}

#[test]
fn test_build_failure_exit_code_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().join("home");
    let env = xcode_env(dir.path(), &[]);
    let events = vec![json!({
        "id": {"progress": {"opaqueCount": 0}},
        "progress": {"stderr": "ERROR: app/BUILD:3:11: compile failed\n"}
    })
    .to_string()];
    let bazel = fake_bazel(dir.path(), &events, 3);

    let runner = MockRunner::new();
    let invocation = BuildInvocation::new(&bazel, vec!["//app:App".to_string()]);
    let (result, diag) = run(&env, &config_in(&home), &runner, &home, &invocation);
    let err = result.unwrap_err();

    assert!(matches!(err, BridgeError::Build(BuildError::Failed(3))));
    assert_eq!(err.exit_code(), 3);
    assert!(diag.output.iter().any(|l| l.contains("compile failed")));
}

#[test]
fn test_unreadable_descriptor_exits_600() {
    let dir = TempDir::new().unwrap();
    let home = dir.path().join("home");
    let env = xcode_env(dir.path(), &[]);
    bazel_bin(dir.path());
    let descriptor = dir.path().join("out/App.xcbazelouts");
    fs::create_dir_all(descriptor.parent().unwrap()).unwrap();
    fs::write(&descriptor, "{ not json").unwrap();
    let bazel = fake_bazel(dir.path(), &events_announcing(&descriptor), 0);

    let runner = MockRunner::new();
    let mut invocation = BuildInvocation::new(&bazel, vec!["//app:App".to_string()]);
    invocation.install_generated_artifacts = true;
    let (result, _) = run(&env, &config_in(&home), &runner, &home, &invocation);

    assert_eq!(result.unwrap_err().exit_code(), 600);
}
