//! CSV log of frame arrival times, written off the pump task.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Result, StreamError};

const HEADER: &str = "FrameNumber,Timestamp\n";

/// Handle to a running log worker.
///
/// [`record`](TimingLog::record) never blocks: entries go through an unbounded channel
/// to a worker task that owns the file.
#[derive(Debug)]
pub struct TimingLog {
    path: PathBuf,
    sender: mpsc::UnboundedSender<(u32, f64)>,
    worker: JoinHandle<std::io::Result<u64>>,
}

impl TimingLog {
    /// Create (truncating) the file and start the worker.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let error = |source| StreamError::TimingLog { path: path.clone(), source };

        let file = File::create(&path).await.map_err(error)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(HEADER.as_bytes()).await.map_err(error)?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<(u32, f64)>();
        let worker = tokio::spawn(async move {
            let mut lines = 0u64;
            while let Some((frame, timestamp)) = receiver.recv().await {
                writer.write_all(format!("{},{:.6}\n", frame, timestamp).as_bytes()).await?;
                lines += 1;
            }
            writer.flush().await?;
            Ok::<_, std::io::Error>(lines)
        });

        debug!(path = %path.display(), "Timing log started");
        Ok(Self { path, sender, worker })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue one line stamped with the current wall-clock time.
    pub fn record(&self, frame_number: u32) {
        let timestamp =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
        if self.sender.send((frame_number, timestamp)).is_err() {
            warn!(path = %self.path.display(), "Timing log worker has stopped");
        }
    }

    /// Stop accepting entries and wait for everything queued to reach disk.
    pub async fn finish(self) -> Result<u64> {
        let Self { path, sender, worker } = self;
        drop(sender);
        let written = match worker.await {
            Ok(result) => {
                result.map_err(|source| StreamError::TimingLog { path: path.clone(), source })?
            }
            Err(join) => {
                return Err(StreamError::TimingLog {
                    path,
                    source: std::io::Error::other(join.to_string()),
                });
            }
        };
        debug!(path = %path.display(), lines = written, "Timing log closed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timing.csv");

        let log = TimingLog::create(&path).await.unwrap();
        log.record(1);
        log.record(2);
        assert_eq!(log.finish().await.unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "FrameNumber,Timestamp");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
        let timestamp: f64 = lines[2].split(',').nth(1).unwrap().parse().unwrap();
        assert!(timestamp > 0.0);
    }

    #[tokio::test]
    async fn unwritable_path_is_reported() {
        let result = TimingLog::create("/nonexistent-dir/timing.csv").await;
        assert!(matches!(result, Err(StreamError::TimingLog { .. })));
    }
}
