//! Per-process log files mirrored to the console.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use p2ptest_core::{HarnessError, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::warn;

/// Write one line to stdout, ignoring a closed stdout.
pub fn console(text: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{text}");
    let _ = out.flush();
}

/// Append-only `<tag>.log` file for one supervised process.
///
/// Every line is flushed as soon as it is written so a killed or crashed run
/// still leaves a complete trail, and echoed to stdout as `<tag>> <text>`.
#[derive(Debug)]
pub struct LogSink {
    tag: String,
    path: PathBuf,
    file: File,
    lines: u64,
}

impl LogSink {
    /// Create (or truncate) `<dir>/<tag>.log`.
    pub fn open(dir: &Path, tag: &str) -> Result<Self> {
        let path = dir.join(format!("{tag}.log"));
        let file = File::create(&path).map_err(|source| HarnessError::LogSink {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            tag: tag.to_string(),
            path,
            file,
            lines: 0,
        })
    }

    pub fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.file, "{text}")?;
        self.file.flush()?;
        self.lines += 1;
        console(&format!("{}> {}", self.tag, text));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Move the sink onto a blocking thread that writes every line received
    /// on `rx`, in order, until all senders are dropped. The sink is handed
    /// back when the thread finishes.
    pub fn spawn_writer(mut self, mut rx: UnboundedReceiver<String>) -> JoinHandle<LogSink> {
        tokio::task::spawn_blocking(move || {
            while let Some(line) = rx.blocking_recv() {
                if let Err(e) = self.write_line(&line) {
                    warn!(tag = %self.tag, path = %self.path.display(), error = %e, "log write failed");
                }
            }
            self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_tagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "peer_server").unwrap();
        assert_eq!(sink.path(), dir.path().join("peer_server.log"));
        assert!(sink.path().exists());
        assert_eq!(sink.lines_written(), 0);
    }

    #[test]
    fn test_write_line_is_flushed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = LogSink::open(dir.path(), "alice").unwrap();
        sink.write_line("hello").unwrap();
        // Read back while the sink is still open.
        let contents = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(contents, "hello\n");
        sink.write_line("world").unwrap();
        let contents = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(contents, "hello\nworld\n");
        assert_eq!(sink.lines_written(), 2);
    }

    #[test]
    fn test_open_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = LogSink::open(dir.path(), "bob").unwrap();
            sink.write_line("first run").unwrap();
        }
        let sink = LogSink::open(dir.path(), "bob").unwrap();
        let contents = std::fs::read_to_string(sink.path()).unwrap();
        assert!(contents.is_empty());
    }

    #[test]
    fn test_open_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = LogSink::open(&missing, "x").unwrap_err();
        assert!(matches!(err, HarnessError::LogSink { .. }));
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path(), "ordered").unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let writer = sink.spawn_writer(rx);
        for i in 0..50 {
            tx.send(format!("line {i}")).unwrap();
        }
        drop(tx);
        let sink = writer.await.unwrap();
        assert_eq!(sink.lines_written(), 50);
        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.first(), Some(&"line 0"));
        assert_eq!(lines.last(), Some(&"line 49"));
    }
}
