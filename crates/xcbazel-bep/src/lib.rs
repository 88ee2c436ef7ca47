//! Bazel Build Event Protocol reader
//!
//! Parses the newline-delimited JSON file written by `bazel build
//! --build_event_json_file=...` while Bazel is still appending to it, and
//! assembles the events into a tree so callers can tell when every
//! announced event has arrived.

pub mod error;
pub mod event;
pub mod reader;
pub mod tree;
pub mod watcher;

pub use error::{EventError, TreeWarning};
pub use event::{event_key, BuildEvent};
pub use reader::LineAccumulator;
pub use tree::EventTree;
pub use watcher::BuildEventsWatcher;

/// URI scheme prefix accepted for `namedSetOfFiles` entries.
pub const FILE_URI_PREFIX: &str = "file://";
