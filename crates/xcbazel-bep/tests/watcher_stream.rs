//! Stream-level tests for the build event watcher
//!
//! Feeds an event file line by line, the way Bazel appends to it while a
//! build runs, and checks tree completion and file discovery.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;

use xcbazel_bep::{BuildEvent, BuildEventsWatcher, EventTree};

fn event(id: Value, children: Vec<Value>) -> Value {
    json!({"id": id, "children": children})
}

/// A small build: root -> {pattern, progress}; pattern -> {target}; target -> {namedSet}.
fn build_stream() -> Vec<Value> {
    let root = json!({"started": {}});
    let pattern = json!({"pattern": {"pattern": ["//app:App"]}});
    let progress = json!({"progress": {"opaqueCount": 1}});
    let target = json!({"targetCompleted": {"label": "//app:App"}});
    let named_set = json!({"namedSet": {"id": "0"}});

    vec![
        event(root, vec![pattern.clone(), progress.clone()]),
        event(pattern, vec![target.clone()]),
        json!({
            "id": progress,
            "children": [],
            "progress": {"stderr": "INFO: Analyzed target //app:App\n"},
        }),
        event(target, vec![named_set.clone()]),
        json!({
            "id": named_set,
            "namedSetOfFiles": {"files": [
                {"name": "App.xcbazelouts", "uri": "file:///out/App.xcbazelouts"},
                {"name": "App.ipa", "uri": "bytestream://cache/blobs/abc/1"},
            ]},
        }),
    ]
}

fn append_line(file: &mut File, value: &Value) {
    writeln!(file, "{value}").unwrap();
    file.flush().unwrap();
}

#[test]
fn test_complete_only_after_last_event() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events.json");
    let mut writer = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .unwrap();
    let mut watcher = BuildEventsWatcher::open(&path).unwrap();

    let stream = build_stream();
    let mut seen = Vec::new();
    for (i, line) in stream.iter().enumerate() {
        assert!(!watcher.is_build_complete(), "complete after prefix of {i} events");
        append_line(&mut writer, line);
        seen.extend(watcher.check_for_new_events().unwrap());
    }

    assert!(watcher.is_build_complete());
    assert_eq!(seen.len(), stream.len());
    assert!(watcher.drain_warnings().is_empty());

    let files: Vec<PathBuf> = seen.iter().flat_map(|e| e.files().to_vec()).collect();
    assert_eq!(files, vec![PathBuf::from("/out/App.xcbazelouts")]);
}

#[test]
fn test_missing_child_never_completes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events.json");
    let mut writer = File::create(&path).unwrap();
    let mut watcher = BuildEventsWatcher::open(&path).unwrap();

    // Drop the pattern event: its child (target) then becomes an orphan too.
    let stream = build_stream();
    for (i, line) in stream.iter().enumerate() {
        if i == 1 {
            continue;
        }
        append_line(&mut writer, line);
    }
    for n in 0..100 {
        append_line(
            &mut writer,
            &json!({"id": {"unrelated": n}, "progress": {"stdout": "noise"}}),
        );
    }

    let events = watcher.check_for_new_events().unwrap();
    assert_eq!(events.len(), stream.len() - 1 + 100);
    assert!(!watcher.is_build_complete());
    assert!(!watcher.drain_warnings().is_empty());
}

#[test]
fn test_partial_record_waits_for_newline() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("events.json");
    let mut writer = File::create(&path).unwrap();
    let mut watcher = BuildEventsWatcher::open(&path).unwrap();

    let line = json!({"id": {"started": {}}, "children": []}).to_string();
    let (head, tail) = line.split_at(line.len() / 2);

    writer.write_all(head.as_bytes()).unwrap();
    writer.flush().unwrap();
    assert!(watcher.check_for_new_events().unwrap().is_empty());
    assert!(watcher.drain_warnings().is_empty());

    writer.write_all(tail.as_bytes()).unwrap();
    writer.write_all(b"\n").unwrap();
    writer.flush().unwrap();
    assert_eq!(watcher.check_for_new_events().unwrap().len(), 1);
    assert!(watcher.is_build_complete());
}

#[test]
fn test_every_prefix_is_incomplete() {
    let stream: Vec<BuildEvent> = build_stream()
        .into_iter()
        .map(|v| BuildEvent::from_value(v).unwrap())
        .collect();

    for prefix in 1..=stream.len() {
        let mut tree = EventTree::new(&stream[0]);
        for event in &stream[1..prefix] {
            tree.insert(event).unwrap();
        }
        assert_eq!(tree.is_complete(), prefix == stream.len(), "prefix {prefix}");
    }
}
