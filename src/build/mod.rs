//! Build orchestration
//!
//! Runs Bazel with its stdout and stderr discarded and follows the build
//! through the event file it writes instead. Progress text carried by the
//! events is forwarded to Xcode as it arrives; output descriptor files
//! announced by the events are collected for the install phase.
//!
//! State machine: `NotStarted -> Running -> {Succeeded, Failed}`.

pub mod command;
pub mod output_patch;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use xcbazel_bep::BuildEventsWatcher;

use crate::report::{Diagnostics, Timer};

pub use command::{query_execution_root, source_maps, BuildRequest};
pub use output_patch::OutputPatcher;

/// File name of the event file, after the `<pid>_` prefix.
pub const BUILD_EVENTS_FILE: &str = "build_events.json";

/// Result type for build orchestration
pub type BuildResult<T> = Result<T, BuildError>;

/// Build orchestration errors
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to prepare build event file {path}: {source}")]
    EventFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read build events: {0}")]
    Events(#[source] io::Error),

    #[error("empty build command")]
    EmptyCommand,

    #[error("build failed with exit code {0}")]
    Failed(i32),

    #[error("Bazel build succeeded but produced no output descriptors; see {0} for details")]
    NoOutputDescriptors(PathBuf),
}

impl BuildError {
    /// The build tool's exit code verbatim for build failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Failed(code) => *code,
            _ => 1,
        }
    }
}

/// Lifecycle of one build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Running,
    Succeeded,
    Failed(i32),
}

/// What a successful build left behind.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// Output descriptor files in discovery order. The first one describes
    /// the primary target.
    pub descriptors: Vec<PathBuf>,
    /// Number of build events read.
    pub events: usize,
    /// Whether the event tree resolved before the build tool exited.
    pub complete: bool,
}

/// The `<pid>_build_events.json` path inside `state_dir`.
pub fn event_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(format!("{}_{}", std::process::id(), BUILD_EVENTS_FILE))
}

/// Removes the event file when dropped unless told to keep it.
#[derive(Debug)]
struct EventFileGuard {
    path: PathBuf,
    keep: bool,
}

impl Drop for EventFileGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove build event file");
            }
        }
    }
}

/// Drives one Bazel build and tracks its event stream.
#[derive(Debug)]
pub struct BuildOrchestrator {
    state: BuildState,
    event_file: PathBuf,
    descriptor_suffix: String,
    poll_interval: Duration,
    patcher: OutputPatcher,
}

impl BuildOrchestrator {
    pub fn new(
        event_file: PathBuf,
        descriptor_suffix: impl Into<String>,
        poll_interval: Duration,
        patcher: OutputPatcher,
    ) -> Self {
        Self {
            state: BuildState::NotStarted,
            event_file,
            descriptor_suffix: descriptor_suffix.into(),
            poll_interval,
            patcher,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn event_file(&self) -> &Path {
        &self.event_file
    }

    /// Run `command` (program first) to completion.
    ///
    /// The event file is truncated before launch so the watcher never sees
    /// a previous build's events.
    pub fn run(
        &mut self,
        command: &[String],
        diag: &mut dyn Diagnostics,
    ) -> BuildResult<BuildOutcome> {
        self.run_with_events(command, BuildEventsWatcher::<BufReader<File>>::open, diag)
    }

    /// [`run`](Self::run) reading events through `open_events`.
    ///
    /// If following the build fails, the build is killed and reaped before
    /// the error is returned.
    fn run_with_events<R: BufRead>(
        &mut self,
        command: &[String],
        open_events: impl FnOnce(&Path) -> io::Result<BuildEventsWatcher<R>>,
        diag: &mut dyn Diagnostics,
    ) -> BuildResult<BuildOutcome> {
        let (program, args) = command.split_first().ok_or(BuildError::EmptyCommand)?;
        self.truncate_event_file()?;
        let mut guard = EventFileGuard {
            path: self.event_file.clone(),
            keep: false,
        };

        let timer = Timer::start("Running Bazel");
        info!(?command, "launching build");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BuildError::Launch {
                program: program.clone(),
                source,
            })?;
        self.state = BuildState::Running;

        let (status, outcome) = match self.follow(&mut child, open_events, diag) {
            Ok(finished) => finished,
            Err(e) => {
                terminate(&mut child);
                self.state = BuildState::Failed(1);
                return Err(e);
            }
        };
        timer.end();

        let exit_code = status.code().unwrap_or(1);
        debug!(exit_code, events = outcome.events, complete = outcome.complete, "build finished");
        if exit_code != 0 {
            self.state = BuildState::Failed(exit_code);
            return Err(BuildError::Failed(exit_code));
        }
        if outcome.descriptors.is_empty() {
            self.state = BuildState::Failed(1);
            guard.keep = true;
            return Err(BuildError::NoOutputDescriptors(self.event_file.clone()));
        }

        self.state = BuildState::Succeeded;
        Ok(outcome)
    }

    fn follow<R: BufRead>(
        &self,
        child: &mut Child,
        open_events: impl FnOnce(&Path) -> io::Result<BuildEventsWatcher<R>>,
        diag: &mut dyn Diagnostics,
    ) -> BuildResult<(ExitStatus, BuildOutcome)> {
        let mut watcher = open_events(&self.event_file).map_err(BuildError::Events)?;
        let mut outcome = BuildOutcome::default();

        let status = loop {
            self.process_events(&mut watcher, &mut outcome, diag)?;
            match child.try_wait().map_err(BuildError::Events)? {
                Some(status) => break status,
                None => thread::sleep(self.poll_interval),
            }
        };
        // Events written between the last poll and exit.
        self.process_events(&mut watcher, &mut outcome, diag)?;
        outcome.complete = watcher.is_build_complete();
        Ok((status, outcome))
    }

    fn truncate_event_file(&self) -> BuildResult<()> {
        let prepare = || -> io::Result<()> {
            if let Some(parent) = self.event_file.parent() {
                fs::create_dir_all(parent)?;
            }
            File::create(&self.event_file)?;
            Ok(())
        };
        prepare().map_err(|source| BuildError::EventFile {
            path: self.event_file.clone(),
            source,
        })
    }

    fn process_events<R: BufRead>(
        &self,
        watcher: &mut BuildEventsWatcher<R>,
        outcome: &mut BuildOutcome,
        diag: &mut dyn Diagnostics,
    ) -> BuildResult<()> {
        let events = watcher.check_for_new_events().map_err(BuildError::Events)?;
        for warning in watcher.drain_warnings() {
            diag.warning(&warning);
        }

        for event in &events {
            for text in [event.stderr(), event.stdout()].into_iter().flatten() {
                for line in self.patcher.patch(text) {
                    diag.output(&line);
                }
            }
            for file in event.files() {
                let is_descriptor = file
                    .to_str()
                    .is_some_and(|f| f.ends_with(&self.descriptor_suffix));
                if is_descriptor && !outcome.descriptors.contains(file) {
                    debug!(descriptor = %file.display(), "found output descriptor");
                    outcome.descriptors.push(file.clone());
                }
            }
        }
        outcome.events += events.len();
        Ok(())
    }
}

/// Kill a build that is no longer being followed and reap it.
fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "kill failed; build may have exited");
    }
    match child.wait() {
        Ok(status) => warn!(pid = child.id(), %status, "terminated build"),
        Err(e) => warn!(pid = child.id(), error = %e, "failed to reap build"),
    }
}
