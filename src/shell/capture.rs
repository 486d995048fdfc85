//! Opt-in output buffering for callers that want a command's output as a whole.
//!
//! Sinks normally stream lines straight to the caller. [`LineBuffer`] keeps
//! them instead, bounded to the most recent `max_lines`, and [`CommandRecord`]
//! is the serializable summary built from it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{ExitStatus, OutputSink};

/// Lines kept by [`LineBuffer::default`].
pub const DEFAULT_MAX_LINES: usize = 10_000;

/// A finished command with its captured output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: usize,
    #[serde(rename = "command")]
    pub lines: Vec<String>,
    pub output: Vec<String>,
    /// Lines dropped from the front of `output` to respect the bound.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dropped: usize,
    pub exit_code: i32,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl CommandRecord {
    pub fn new(id: usize, lines: Vec<String>, buffer: &LineBuffer, status: ExitStatus) -> Self {
        let (output, dropped) = buffer.snapshot();
        Self {
            id,
            lines,
            output,
            dropped,
            exit_code: status.code(),
        }
    }
}

#[derive(Debug, Default)]
struct Buffered {
    lines: VecDeque<String>,
    dropped: usize,
}

/// Shared, bounded line collector usable as an [`OutputSink`].
///
/// Clones share the same storage, so keep one clone and hand the other to
/// [`Command::new`](super::Command::new).
#[derive(Clone, Debug)]
pub struct LineBuffer {
    inner: Arc<Mutex<Buffered>>,
    max_lines: usize,
}

impl LineBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Buffered::default())),
            max_lines,
        }
    }

    pub fn push(&self, line: &str) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if self.max_lines == 0 {
            buf.dropped += 1;
            return;
        }
        // Drop oldest line if at capacity
        if buf.lines.len() >= self.max_lines {
            buf.lines.pop_front();
            buf.dropped += 1;
        }
        buf.lines.push_back(line.to_string());
    }

    /// The kept lines plus how many older lines were dropped.
    pub fn snapshot(&self) -> (Vec<String>, usize) {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (buf.lines.iter().cloned().collect(), buf.dropped)
    }

    pub fn lines(&self) -> Vec<String> {
        self.snapshot().0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl OutputSink for LineBuffer {
    fn output(&mut self, _id: usize, line: &str) {
        self.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_storage() {
        let buffer = LineBuffer::new(10);
        let mut sink = buffer.clone();

        sink.output(0, "file1.txt");
        sink.output(0, "file2.txt");

        assert_eq!(buffer.lines(), vec!["file1.txt", "file2.txt"]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_bounded_buffer() {
        let buffer = LineBuffer::new(3);
        for i in 1..=5 {
            buffer.push(&format!("line{}", i));
        }

        // Should only keep last 3
        let (lines, dropped) = buffer.snapshot();
        assert_eq!(lines, vec!["line3", "line4", "line5"]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let buffer = LineBuffer::new(0);
        buffer.push("a");
        assert!(buffer.is_empty());
        assert_eq!(buffer.snapshot().1, 1);
    }

    #[test]
    fn test_record_serialization() {
        let buffer = LineBuffer::new(10);
        buffer.push("/home/user");
        let record = CommandRecord::new(
            2,
            vec!["pwd".to_string()],
            &buffer,
            ExitStatus::Code(0),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 2);
        assert_eq!(json["command"][0], "pwd");
        assert_eq!(json["output"][0], "/home/user");
        assert_eq!(json["exit_code"], 0);
        assert!(json.get("dropped").is_none());

        let back: CommandRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_of_terminated_command() {
        let record = CommandRecord::new(
            0,
            vec!["sleep 100".to_string()],
            &LineBuffer::default(),
            ExitStatus::Terminated,
        );
        assert_eq!(record.exit_code, -1);
        assert!(record.output.is_empty());
    }
}
