//! IDE-visible diagnostics and logging setup
//!
//! Xcode scans the output of a build phase for issue lines. Anything written
//! as `:: warning: <msg>` on stdout lands in the issue navigator as a warning
//! and `:: error: <msg>` on stderr as an error. Those two channels are what
//! the user sees; everything else goes through `tracing` and is only shown
//! with `-v` or `RUST_LOG`.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sink for everything the bridge shows in the Xcode build log.
pub trait Diagnostics {
    /// Advisory issue; never stops the build.
    fn warning(&mut self, msg: &str);

    /// Fatal issue, reported once by the driver before exiting.
    fn error(&mut self, msg: &str);

    /// A line of forwarded build tool output (already patched).
    fn output(&mut self, line: &str);
}

/// Writes to the process's own stdout/stderr, which Xcode captures.
#[derive(Debug, Default)]
pub struct XcodeConsole;

impl Diagnostics for XcodeConsole {
    fn warning(&mut self, msg: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, ":: warning: {msg}");
        let _ = out.flush();
    }

    fn error(&mut self, msg: &str) {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, ":: error: {msg}");
        let _ = err.flush();
    }

    fn output(&mut self, line: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

/// Keeps every diagnostic in memory. Used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct CapturedDiagnostics {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub output: Vec<String>,
}

impl Diagnostics for CapturedDiagnostics {
    fn warning(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }

    fn output(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

/// Simple profiler for a named bridge action.
#[derive(Debug)]
pub struct Timer {
    action: String,
    start: Instant,
}

impl Timer {
    pub fn start(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            start: Instant::now(),
        }
    }

    /// Stop the timer and log `<*> <action> completed in N ms`.
    pub fn end(self) -> Duration {
        let elapsed = self.start.elapsed();
        info!("<*> {} completed in {} ms", self.action, elapsed.as_millis());
        elapsed
    }
}

/// Map the `-v` count to a default log level.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }

    #[test]
    fn test_captured_diagnostics() {
        let mut diag = CapturedDiagnostics::default();
        diag.warning("careful");
        diag.error("broken");
        diag.output("a.swift:1: warning: x");

        assert_eq!(diag.warnings, vec!["careful"]);
        assert_eq!(diag.errors, vec!["broken"]);
        assert_eq!(diag.output.len(), 1);
    }

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = Timer::start("Sleeping");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.end() >= Duration::from_millis(5));
    }
}
