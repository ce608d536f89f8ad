//! Incremental event-stream tailing.
//!
//! One cursor against one file, polled. Survives the file not existing yet,
//! being truncated, or being replaced by a new file under the same name
//! (rotation): identity is tracked by inode, and any shrink or identity
//! change resets the cursor to the start of the new file instead of erroring.
//! Partial trailing lines are buffered across polls so records are always
//! delivered whole.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Which event-stream dialect a source carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Shared assistant TUI log; lines carry their owning session inline.
    LogLine,
    /// Per-session rollout JSONL of structured records.
    Rollout,
}

/// One parsed unit of input: a complete line plus the dialect it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub kind: StreamKind,
    pub raw: String,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one poll.
#[derive(Debug, Default)]
pub struct Poll {
    pub records: Vec<EventRecord>,
    /// File was truncated or replaced; the cursor restarted at offset 0.
    pub rotated: bool,
    /// File does not exist (yet). Not an error.
    pub absent: bool,
    /// New bytes were read, complete lines or not. Drives staleness.
    pub grew: bool,
}

/// Tail cursor over one stream file.
#[derive(Debug)]
pub struct EventSource {
    kind: StreamKind,
    path: PathBuf,
    position: u64,
    identity: Option<u64>,
    line_buffer: String,
    /// False until the file has been opened once. A file that exists at bind
    /// time is tailed from its end (history would replay already-handled
    /// turns); a file that appears later is read from 0 — all of it is new.
    initialized: bool,
    /// The file was observed missing before it was ever opened.
    was_absent: bool,
    start_at_end: bool,
    consecutive_errors: u32,
}

impl EventSource {
    pub fn new(kind: StreamKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            position: 0,
            identity: None,
            line_buffer: String::new(),
            initialized: false,
            was_absent: false,
            start_at_end: true,
            consecutive_errors: 0,
        }
    }

    /// Tail from offset 0 even if the file already exists. Test hook and
    /// replay tool; production binds always start at the end.
    pub fn new_from_start(kind: StreamKind, path: PathBuf) -> Self {
        let mut source = Self::new(kind, path);
        source.start_at_end = false;
        source
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consecutive failing polls since the last success.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Whether the file has been opened at least once. An absent file that
    /// was previously open has been deleted, not "not created yet".
    pub fn opened(&self) -> bool {
        self.initialized
    }

    /// Read everything appended since the previous poll.
    pub fn poll(&mut self) -> Result<Poll, StreamError> {
        match self.poll_inner() {
            Ok(poll) => {
                self.consecutive_errors = 0;
                Ok(poll)
            }
            Err(e) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                Err(e)
            }
        }
    }

    fn poll_inner(&mut self) -> Result<Poll, StreamError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.initialized {
                    self.was_absent = true;
                }
                return Ok(Poll {
                    absent: true,
                    ..Poll::default()
                });
            }
            Err(source) => {
                return Err(StreamError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let meta = file.metadata().map_err(|source| StreamError::Io {
            path: self.path.clone(),
            source,
        })?;
        let len = meta.len();
        let identity = file_identity(&meta);

        let mut rotated = false;
        if !self.initialized {
            self.initialized = true;
            self.identity = Some(identity);
            // A file that only appeared after watching began is entirely new
            // content; start from 0 regardless of the end-start policy.
            self.position = if self.start_at_end && !self.was_absent {
                len
            } else {
                0
            };
        } else if self.identity != Some(identity) || len < self.position {
            // Replaced or truncated: everything in the new file is unread.
            debug!(path = %self.path.display(), "stream rotated, cursor reset");
            self.identity = Some(identity);
            self.position = 0;
            self.line_buffer.clear();
            rotated = true;
        }

        file.seek(SeekFrom::Start(self.position))
            .map_err(|source| StreamError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut new_bytes = Vec::new();
        let n = file
            .read_to_end(&mut new_bytes)
            .map_err(|source| StreamError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.position += n as u64;

        let mut records = Vec::new();
        if n > 0 {
            self.line_buffer
                .push_str(&String::from_utf8_lossy(&new_bytes));
            while let Some(newline) = self.line_buffer.find('\n') {
                let line: String = self.line_buffer.drain(..=newline).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    continue;
                }
                records.push(EventRecord {
                    kind: self.kind,
                    raw: line.to_string(),
                });
            }
        }

        Ok(Poll {
            records,
            rotated,
            absent: false,
            grew: n > 0,
        })
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> u64 {
    // Size-shrink detection still catches truncation; replacement with an
    // equal-or-longer file goes unnoticed on this platform.
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn raws(poll: &Poll) -> Vec<&str> {
        poll.records.iter().map(|r| r.raw.as_str()).collect()
    }

    #[test]
    fn absent_file_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = EventSource::new(StreamKind::LogLine, tmp.path().join("missing.log"));
        let poll = source.poll().unwrap();
        assert!(poll.absent);
        assert!(poll.records.is_empty());
        assert_eq!(source.consecutive_errors(), 0);
    }

    #[test]
    fn existing_file_starts_at_end() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        append(&path, "old line\n");

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        assert!(source.poll().unwrap().records.is_empty());

        append(&path, "new line\n");
        let poll = source.poll().unwrap();
        assert_eq!(raws(&poll), vec!["new line"]);
    }

    #[test]
    fn file_appearing_later_reads_from_start() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");

        let mut source = EventSource::new(StreamKind::Rollout, path.clone());
        assert!(source.poll().unwrap().absent);

        append(&path, "first record\n");
        let poll = source.poll().unwrap();
        assert_eq!(raws(&poll), vec!["first record"]);
        assert!(!poll.rotated);
    }

    #[test]
    fn partial_lines_buffer_across_polls() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();

        append(&path, "half a li");
        assert!(source.poll().unwrap().records.is_empty());

        append(&path, "ne\nand more\n");
        let poll = source.poll().unwrap();
        assert_eq!(raws(&poll), vec!["half a line", "and more"]);
    }

    #[test]
    fn crlf_and_blank_lines_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();

        append(&path, "one\r\n\r\ntwo\n");
        let poll = source.poll().unwrap();
        assert_eq!(raws(&poll), vec!["one", "two"]);
    }

    #[test]
    fn truncation_resets_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();

        // Truncate in place (same inode, smaller size).
        fs::write(&path, "cc\n").unwrap();
        let poll = source.poll().unwrap();
        assert!(poll.rotated);
        assert_eq!(raws(&poll), vec!["cc"]);
    }

    #[cfg(unix)]
    #[test]
    fn replacement_with_longer_file_is_detected_by_inode() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "old\n").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();

        // New file with the same name but different identity, and *longer*
        // than the old one — size alone would not notice.
        let staged = tmp.path().join("staged");
        fs::write(&staged, "replacement content line\n").unwrap();
        fs::rename(&staged, &path).unwrap();

        let poll = source.poll().unwrap();
        assert!(poll.rotated);
        assert_eq!(raws(&poll), vec!["replacement content line"]);
    }

    #[test]
    fn rotation_does_not_reemit_old_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();
        append(&path, "from old file\n");
        assert_eq!(raws(&source.poll().unwrap()), vec!["from old file"]);

        fs::write(&path, "fresh\n").unwrap();
        let poll = source.poll().unwrap();
        assert!(poll.rotated);
        assert_eq!(raws(&poll), vec!["fresh"], "old bytes must not replay");

        // And a quiet follow-up poll yields nothing.
        assert!(source.poll().unwrap().records.is_empty());
    }

    #[test]
    fn rotation_drops_buffered_partial_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "").unwrap();

        let mut source = EventSource::new(StreamKind::LogLine, path.clone());
        source.poll().unwrap();
        append(&path, "no newline yet");
        source.poll().unwrap();

        fs::write(&path, "x\n").unwrap();
        let poll = source.poll().unwrap();
        // The orphaned fragment must not be glued onto the new file's data.
        assert_eq!(raws(&poll), vec!["x"]);
    }

    #[test]
    fn missing_parent_directory_behaves_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let gone_parent = tmp.path().join("p").join("f.log");
        let mut source = EventSource::new(StreamKind::LogLine, gone_parent);
        assert!(source.poll().unwrap().absent);
        assert_eq!(source.consecutive_errors(), 0);
    }

    #[test]
    fn from_start_reads_existing_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        fs::write(&path, "a\nb\n").unwrap();

        let mut source = EventSource::new_from_start(StreamKind::Rollout, path);
        let poll = source.poll().unwrap();
        assert_eq!(raws(&poll), vec!["a", "b"]);
    }
}
