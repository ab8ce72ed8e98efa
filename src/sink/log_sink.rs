//! Buffered, append-only log sink.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use super::LogTarget;
use crate::domain::PacketSummary;
use crate::error::SinkError;

/// Default number of lines held in memory before a write blocks on a flush.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Appends summary lines to a target through a bounded in-memory buffer.
///
/// Lines leave the buffer in the order they were written. When the buffer
/// is full, `write` flushes synchronously before accepting the next line,
/// so a slow target slows the caller down instead of losing lines.
pub struct LogSink<T: LogTarget = File> {
    target: Option<T>,
    buffer: VecDeque<String>,
    /// Bytes of the front line the target already accepted
    front_written: usize,
    capacity: usize,
    lines_written: u64,
}

impl LogSink<File> {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let unwritable = |source| SinkError::PathUnwritable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unwritable)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(unwritable)?;

        tracing::info!(path = %path.display(), capacity, "Opened log sink");

        Ok(Self::with_target(file, capacity))
    }
}

impl<T: LogTarget> LogSink<T> {
    /// Wrap an already-open target.
    pub fn with_target(target: T, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            target: Some(target),
            buffer: VecDeque::with_capacity(capacity),
            front_written: 0,
            capacity,
            lines_written: 0,
        }
    }

    /// Format and buffer one summary, flushing first if the buffer is full.
    pub fn write(&mut self, summary: &PacketSummary) -> Result<(), SinkError> {
        if self.target.is_none() {
            return Err(SinkError::Closed);
        }
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        self.buffer.push_back(summary.to_log_line());
        Ok(())
    }

    /// Write all buffered lines and sync the target.
    ///
    /// A line is only removed from the buffer once the target accepted all
    /// of it. A line cut short by an error resumes where it stopped, so a
    /// retry never repeats bytes already in the target.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        let Some(target) = self.target.as_mut() else {
            return Err(SinkError::Closed);
        };

        while let Some(line) = self.buffer.front() {
            let bytes = line.as_bytes();
            while self.front_written < bytes.len() {
                match target.write(&bytes[self.front_written..]) {
                    Ok(0) => {
                        return Err(SinkError::Io(io::Error::new(
                            ErrorKind::WriteZero,
                            "log target accepted no bytes",
                        )))
                    }
                    Ok(n) => self.front_written += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(SinkError::Io(e)),
                }
            }
            self.buffer.pop_front();
            self.front_written = 0;
            self.lines_written += 1;
        }
        target.flush()?;
        target.sync()?;
        Ok(())
    }

    /// Flush and release the target. Closing a closed sink is a no-op.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if self.target.is_none() {
            return Ok(());
        }

        let result = self.flush();
        self.target = None;

        match &result {
            Ok(()) => tracing::debug!(lines = self.lines_written, "Closed log sink"),
            Err(e) => tracing::error!(
                lost = self.buffer.len(),
                "Closed log sink with unwritten lines: {}",
                e
            ),
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.target.is_none()
    }

    /// Lines accepted by `write` but not yet handed to the target.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Lines handed to the target so far.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }
}

impl<T: LogTarget> Drop for LogSink<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close log sink on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, Protocol};
    use crate::sink::test_targets::{FailingTarget, SharedBuffer, ShortWriteTarget, StalledTarget};
    use chrono::Utc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn summary(n: usize) -> PacketSummary {
        PacketSummary {
            timestamp: Utc::now(),
            protocol: Protocol::Udp,
            source: Endpoint::Socket(format!("10.0.0.1:{}", 1000 + n).parse().unwrap()),
            destination: Endpoint::Socket("10.0.0.2:53".parse().unwrap()),
            length: 60 + n,
            descriptor: format!("payload={}", n),
        }
    }

    #[test]
    fn test_write_buffers_until_flush() {
        let buffer = SharedBuffer::default();
        let mut sink = LogSink::with_target(buffer.clone(), 10);

        sink.write(&summary(0)).unwrap();
        sink.write(&summary(1)).unwrap();
        assert_eq!(sink.buffered(), 2);
        assert!(buffer.contents().is_empty());

        sink.flush().unwrap();
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.lines_written(), 2);
        assert_eq!(buffer.lines().len(), 2);
        assert_eq!(buffer.sync_count(), 1);
    }

    #[test]
    fn test_full_buffer_flushes_in_order() {
        let buffer = SharedBuffer::default();
        let mut sink = LogSink::with_target(buffer.clone(), 3);

        for n in 0..7 {
            sink.write(&summary(n)).unwrap();
        }
        sink.close().unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 7);
        for (n, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!("payload={}", n)), "line {} out of order: {}", n, line);
        }
    }

    #[test]
    fn test_backpressure_blocks_instead_of_dropping() {
        let target = StalledTarget::default();
        let output = target.buffer.clone();
        let gate = target.clone();
        let mut sink = LogSink::with_target(target, 2);

        let (done_tx, done_rx) = mpsc::channel();
        let writer = thread::spawn(move || {
            for n in 0..3 {
                sink.write(&summary(n)).unwrap();
                done_tx.send(n).unwrap();
            }
            sink.close().unwrap();
        });

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(0));
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        // Third write needs a free slot, which needs the stalled target
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        gate.release();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(2));
        writer.join().unwrap();

        assert_eq!(output.lines().len(), 3);
    }

    #[test]
    fn test_close_is_idempotent() {
        let buffer = SharedBuffer::default();
        let mut sink = LogSink::with_target(buffer.clone(), 10);
        sink.write(&summary(0)).unwrap();

        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());
        assert_eq!(buffer.lines().len(), 1);
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut sink = LogSink::with_target(SharedBuffer::default(), 10);
        sink.close().unwrap();

        assert!(matches!(sink.write(&summary(0)), Err(SinkError::Closed)));
        assert!(matches!(sink.flush(), Err(SinkError::Closed)));
    }

    #[test]
    fn test_io_failure_reported_and_lines_retained() {
        let mut sink = LogSink::with_target(FailingTarget, 1);
        sink.write(&summary(0)).unwrap();

        assert!(matches!(sink.write(&summary(1)), Err(SinkError::Io(_))));
        assert_eq!(sink.buffered(), 1);
        assert!(matches!(sink.close(), Err(SinkError::Io(_))));
        assert!(sink.is_closed());
    }

    #[test]
    fn test_partial_write_resumes_without_duplication() {
        let target = ShortWriteTarget::new(10);
        let output = target.buffer.clone();
        let mut sink = LogSink::with_target(target, 10);
        let first = summary(0);
        let second = summary(1);
        sink.write(&first).unwrap();
        sink.write(&second).unwrap();

        assert!(matches!(sink.flush(), Err(SinkError::Io(_))));
        assert_eq!(sink.buffered(), 2);
        assert_eq!(output.contents().len(), 10);

        sink.close().unwrap();
        assert_eq!(sink.lines_written(), 2);
        assert_eq!(
            output.contents(),
            format!("{}{}", first.to_log_line(), second.to_log_line())
        );
    }

    #[test]
    fn test_drop_flushes() {
        let buffer = SharedBuffer::default();
        {
            let mut sink = LogSink::with_target(buffer.clone(), 10);
            sink.write(&summary(0)).unwrap();
        }
        assert_eq!(buffer.lines().len(), 1);
    }

    #[test]
    fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("network.log");

        let mut sink = LogSink::open(&path, 10).unwrap();
        sink.write(&summary(0)).unwrap();
        sink.close().unwrap();

        let mut sink = LogSink::open(&path, 10).unwrap();
        sink.write(&summary(1)).unwrap();
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("payload=0"));
        assert!(lines[1].ends_with("payload=1"));
    }

    #[test]
    fn test_open_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file
        let result = LogSink::open(dir.path(), 10);
        assert!(matches!(result, Err(SinkError::PathUnwritable { .. })));
    }
}
