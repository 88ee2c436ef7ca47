//! External command execution
//!
//! `codesign`, `dwarfdump` and `bazel info` are only ever needed for their
//! exit code and combined output. The trait keeps them swappable so every
//! install-phase pass can be tested without Xcode on the machine.

use std::collections::VecDeque;
use std::io;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::debug;

/// Exit status and output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    /// stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command to completion.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

/// Spawns real processes and waits for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

/// Scripted runner for tests: answers commands from a queue per program and
/// records every invocation.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    fallback: Mutex<Option<CommandOutput>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for the next invocation whose command line starts with
    /// `prefix` (program and arguments joined by spaces).
    pub fn respond(&self, prefix: &str, output: CommandOutput) -> &Self {
        if let Ok(mut responses) = self.responses.lock() {
            match responses.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(output),
                None => responses.push((prefix.to_string(), VecDeque::from([output]))),
            }
        }
        self
    }

    /// Answer unmatched commands with `output` instead of failing.
    pub fn respond_by_default(&self, output: CommandOutput) -> &Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(output);
        }
        self
    }

    /// Every command line seen so far, program first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls whose command line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.join(" ").starts_with(prefix))
            .count()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().cloned());
        let line = call.join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }

        if let Ok(mut responses) = self.responses.lock() {
            // Longest matching prefix wins.
            let best = responses
                .iter_mut()
                .filter(|(prefix, queue)| line.starts_with(prefix.as_str()) && !queue.is_empty())
                .max_by_key(|(prefix, _)| prefix.len());
            if let Some((_, queue)) = best {
                if let Some(output) = queue.pop_front() {
                    return Ok(output);
                }
            }
        }

        match self.fallback.lock().ok().and_then(|f| f.clone()) {
            Some(output) => Ok(output),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no scripted response for `{line}`"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mock_runner_matches_longest_prefix() {
        let runner = MockRunner::new();
        runner
            .respond("xcrun", CommandOutput::success("generic"))
            .respond("xcrun codesign -dvv", CommandOutput::success("Authority=Dev"));

        let out = runner.run("xcrun", &args(&["codesign", "-dvv", "/A.app"])).unwrap();
        assert_eq!(out.output, "Authority=Dev");
        let out = runner.run("xcrun", &args(&["dwarfdump"])).unwrap();
        assert_eq!(out.output, "generic");
        assert_eq!(runner.count("xcrun codesign"), 1);
    }

    #[test]
    fn test_mock_runner_without_response_errors() {
        let runner = MockRunner::new();
        assert!(runner.run("bazel", &args(&["info"])).is_err());

        runner.respond_by_default(CommandOutput::failure(3, "nope"));
        let out = runner.run("bazel", &args(&["info"])).unwrap();
        assert!(!out.is_success());
        assert_eq!(runner.calls().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_combines_output() {
        let out = SystemRunner
            .run("sh", &args(&["-c", "echo out; echo err 1>&2; exit 3"]))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }
}
