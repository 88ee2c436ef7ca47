//! Line reader for files that are still being written.
//!
//! Bazel appends to the build event file for the whole duration of the
//! build, so a read can stop in the middle of a record. The accumulator
//! keeps such partial content until the rest of the line shows up.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Buffers partial reads from a growing stream and yields complete lines.
#[derive(Debug)]
pub struct LineAccumulator<R> {
    reader: R,
    pending: Vec<u8>,
}

impl LineAccumulator<BufReader<File>> {
    /// Open `path` for reading from its beginning.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> LineAccumulator<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Check the stream for a newly completed line.
    ///
    /// Returns the line including its `\n` terminator once one has been
    /// fully assembled, or `None` if only a partial line (or nothing) is
    /// available so far. Never blocks waiting for more data.
    pub fn check_for_changes(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending)?;
        if read == 0 || self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }

        // Bazel may emit invalid UTF-8 in captured tool output; keep going.
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }

    /// Number of buffered bytes belonging to an unfinished line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    #[test]
    fn test_multiple_lines() {
        let input = Cursor::new(b"First Line.\nSecond Line.\nThird Line.\n".to_vec());
        let mut reader = LineAccumulator::new(input);

        assert_eq!(reader.check_for_changes().unwrap().as_deref(), Some("First Line.\n"));
        assert_eq!(reader.check_for_changes().unwrap().as_deref(), Some("Second Line.\n"));
        assert_eq!(reader.check_for_changes().unwrap().as_deref(), Some("Third Line.\n"));
        assert_eq!(reader.check_for_changes().unwrap(), None);
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.json");
        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let mut reader = LineAccumulator::open(&path).unwrap();

        assert_eq!(reader.check_for_changes().unwrap(), None);

        writer.write_all(b"ab").unwrap();
        writer.flush().unwrap();
        assert_eq!(reader.check_for_changes().unwrap(), None);
        assert_eq!(reader.pending_len(), 2);

        writer.write_all(b"c\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(reader.check_for_changes().unwrap().as_deref(), Some("abc\n"));
        assert_eq!(reader.pending_len(), 0);
    }

    #[test]
    fn test_idle_polls_consume_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.json");
        let mut writer = File::create(&path).unwrap();
        let mut reader = LineAccumulator::open(&path).unwrap();

        for _ in 0..5 {
            assert_eq!(reader.check_for_changes().unwrap(), None);
        }

        writer.write_all(b"line\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(reader.check_for_changes().unwrap().as_deref(), Some("line\n"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let input = Cursor::new(b"ok \xff\n".to_vec());
        let mut reader = LineAccumulator::new(input);

        let line = reader.check_for_changes().unwrap().unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.ends_with('\n'));
    }
}
