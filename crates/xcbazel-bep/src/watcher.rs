//! Polling watcher over a live build event file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::event::BuildEvent;
use crate::reader::LineAccumulator;
use crate::tree::EventTree;

/// Reads new events from a growing event file and tracks tree completion.
#[derive(Debug)]
pub struct BuildEventsWatcher<R> {
    reader: LineAccumulator<R>,
    tree: Option<EventTree>,
    warnings: Vec<String>,
}

impl BuildEventsWatcher<BufReader<File>> {
    /// Watch the event file at `path`. The file must already exist.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(LineAccumulator::open(path)?))
    }
}

impl<R: BufRead> BuildEventsWatcher<R> {
    pub fn new(reader: LineAccumulator<R>) -> Self {
        Self {
            reader,
            tree: None,
            warnings: Vec::new(),
        }
    }

    /// Return every event completed since the previous call, in stream order.
    ///
    /// Malformed lines and events that cannot be placed in the tree are
    /// recorded as warnings and skipped or still returned, respectively.
    pub fn check_for_new_events(&mut self) -> io::Result<Vec<BuildEvent>> {
        let mut events = Vec::new();
        while let Some(line) = self.reader.check_for_changes()? {
            if line.trim().is_empty() {
                continue;
            }
            let event = match BuildEvent::from_line(&line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping malformed build event line");
                    self.warnings.push(format!("Could not decode build event: {e}"));
                    continue;
                }
            };

            match self.tree.as_mut() {
                None => {
                    debug!(id = ?event.key(), "root build event");
                    self.tree = Some(EventTree::new(&event));
                }
                Some(tree) => {
                    if let Err(w) = tree.insert(&event) {
                        debug!(warning = %w, "build event not attached");
                        self.warnings.push(w.to_string());
                    }
                }
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Whether the root event and all of its announced descendants arrived.
    pub fn is_build_complete(&self) -> bool {
        self.tree.as_ref().is_some_and(EventTree::is_complete)
    }

    /// Take the warnings collected since the last drain.
    pub fn drain_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
