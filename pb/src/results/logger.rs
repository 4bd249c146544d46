//! ResultLogger - queue-fed line writer for benchmark result logs
//!
//! Callers enqueue records on an unbounded channel and return immediately; a
//! background task appends each line to the current result file and flushes.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result, eyre};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Append-only, ordered line sink
///
/// `write` must not block beyond enqueueing the line.
pub trait ResultSink: Send + Sync {
    fn write(&self, line: String);

    fn record(&self, record: LogRecord) {
        self.write(record.to_string());
    }
}

/// One result log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Connect {
        timestamp: DateTime<Utc>,
        benchmark_id: String,
        client_id: String,
    },
    Subscribe {
        timestamp: DateTime<Utc>,
        benchmark_id: String,
        client_id: String,
        topic_filter: String,
        purpose_filter: String,
        subscription_id: u64,
    },
    Publish {
        timestamp: DateTime<Utc>,
        benchmark_id: String,
        client_id: String,
        topic: String,
        purpose: String,
        msg_type: String,
        payload: String,
    },
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Micros, true);
        match self {
            LogRecord::Connect {
                timestamp,
                benchmark_id,
                client_id,
            } => write!(f, "CONNECT#{}#{}#{}", ts(timestamp), benchmark_id, client_id),
            LogRecord::Subscribe {
                timestamp,
                benchmark_id,
                client_id,
                topic_filter,
                purpose_filter,
                subscription_id,
            } => write!(
                f,
                "SUBSCRIBE#{}#{}#{}#{}#{}#{}",
                ts(timestamp),
                benchmark_id,
                client_id,
                topic_filter,
                purpose_filter,
                subscription_id
            ),
            LogRecord::Publish {
                timestamp,
                benchmark_id,
                client_id,
                topic,
                purpose,
                msg_type,
                payload,
            } => write!(
                f,
                "PUBLISH#{}#{}#{}#{}#{}#{}#{}",
                ts(timestamp),
                benchmark_id,
                client_id,
                topic,
                purpose,
                msg_type,
                payload
            ),
        }
    }
}

enum LoggerCommand {
    Line(String),
    Setup {
        path: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<u64>>,
    },
}

/// Handle to the background result writer
#[derive(Clone)]
pub struct ResultLogger {
    tx: mpsc::UnboundedSender<LoggerCommand>,
}

impl ResultLogger {
    /// Spawn the writer task; lines are dropped until [`setup`](Self::setup) names a file
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(rx));
        debug!("ResultLogger::spawn: writer task started");
        Self { tx }
    }

    /// Spawn the writer task and open `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let logger = Self::spawn();
        logger.setup(path).await?;
        Ok(logger)
    }

    /// Switch output to a new file, closing the previous one
    ///
    /// Fails if the previous file cannot be flushed or the new one cannot be
    /// opened; either way no file is set up afterwards.
    pub async fn setup(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "ResultLogger::setup: called");
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(LoggerCommand::Setup { path, reply })
            .map_err(|_| eyre!("Result logger channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Result logger stopped before reply"))?
    }

    /// Drain queued lines, flush, and stop the writer
    ///
    /// Returns the number of lines written over the logger's lifetime, or an
    /// error if any line or the final flush failed.
    pub async fn shutdown(&self) -> Result<u64> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(LoggerCommand::Shutdown { reply })
            .map_err(|_| eyre!("Result logger channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Result logger stopped before reply"))?
    }
}

impl ResultSink for ResultLogger {
    fn write(&self, line: String) {
        if self.tx.send(LoggerCommand::Line(line)).is_err() {
            warn!("ResultLogger: writer stopped, dropping line");
        }
    }
}

async fn open_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .context(format!("Failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .context(format!("Failed to open result log {}", path.display()))
}

async fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

async fn close_file(mut file: File) -> Result<()> {
    file.flush().await.context("Failed to flush result log")
}

async fn writer_loop(mut rx: mpsc::UnboundedReceiver<LoggerCommand>) {
    let mut file: Option<File> = None;
    let mut written: u64 = 0;
    let mut failed: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            LoggerCommand::Line(line) => {
                let Some(f) = file.as_mut() else {
                    debug!("ResultLogger: no file set up, dropping line");
                    continue;
                };
                match write_line(f, &line).await {
                    Ok(()) => written += 1,
                    Err(e) => {
                        error!(error = %e, "ResultLogger: failed to write line");
                        failed += 1;
                    }
                }
            }
            LoggerCommand::Setup { path, reply } => {
                let mut result = Ok(());
                if let Some(old) = file.take()
                    && let Err(e) = close_file(old).await
                {
                    error!(error = %e, "ResultLogger: failed to flush previous file");
                    result = Err(e);
                }
                if result.is_ok() {
                    result = open_file(&path).await.map(|f| {
                        file = Some(f);
                    });
                }
                if reply.send(result).is_err() {
                    debug!("ResultLogger: setup caller went away");
                }
            }
            LoggerCommand::Shutdown { reply } => {
                let mut result = Ok(written);
                if let Some(f) = file.take()
                    && let Err(e) = close_file(f).await
                {
                    error!(error = %e, "ResultLogger: failed to flush on shutdown");
                    result = Err(e);
                }
                if failed > 0 && result.is_ok() {
                    result = Err(eyre!("{} result lines could not be written", failed));
                }
                if reply.send(result).is_err() {
                    debug!("ResultLogger: shutdown caller went away");
                }
                break;
            }
        }
    }
    debug!(written, failed, "ResultLogger: writer task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::tempdir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_record_formats() {
        let connect = LogRecord::Connect {
            timestamp: fixed_time(),
            benchmark_id: "benchmark-1".to_string(),
            client_id: "client-0".to_string(),
        };
        assert_eq!(
            connect.to_string(),
            "CONNECT#2024-05-01T12:00:00.000000Z#benchmark-1#client-0"
        );

        let subscribe = LogRecord::Subscribe {
            timestamp: fixed_time(),
            benchmark_id: "benchmark-1".to_string(),
            client_id: "client-0".to_string(),
            topic_filter: "room1".to_string(),
            purpose_filter: "{chat,alert}".to_string(),
            subscription_id: 7,
        };
        assert_eq!(
            subscribe.to_string(),
            "SUBSCRIBE#2024-05-01T12:00:00.000000Z#benchmark-1#client-0#room1#{chat,alert}#7"
        );

        let publish = LogRecord::Publish {
            timestamp: fixed_time(),
            benchmark_id: "benchmark-1".to_string(),
            client_id: "client-0".to_string(),
            topic: "room1".to_string(),
            purpose: "chat".to_string(),
            msg_type: "PM_3".to_string(),
            payload: "hi".to_string(),
        };
        assert_eq!(
            publish.to_string(),
            "PUBLISH#2024-05-01T12:00:00.000000Z#benchmark-1#client-0#room1#chat#PM_3#hi"
        );
    }

    #[tokio::test]
    async fn test_lines_written_in_order() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("results").join("run.log");
        let logger = ResultLogger::open(&path).await.unwrap();

        logger.record(LogRecord::Connect {
            timestamp: Utc::now(),
            benchmark_id: "b1".to_string(),
            client_id: "c1".to_string(),
        });
        logger.record(LogRecord::Subscribe {
            timestamp: Utc::now(),
            benchmark_id: "b1".to_string(),
            client_id: "c1".to_string(),
            topic_filter: "room1".to_string(),
            purpose_filter: "chat".to_string(),
            subscription_id: 1,
        });
        logger.record(LogRecord::Publish {
            timestamp: Utc::now(),
            benchmark_id: "b1".to_string(),
            client_id: "c1".to_string(),
            topic: "room1".to_string(),
            purpose: "chat".to_string(),
            msg_type: "PM_1".to_string(),
            payload: "hello".to_string(),
        });
        assert_eq!(logger.shutdown().await.unwrap(), 3);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CONNECT#"));
        assert!(lines[1].starts_with("SUBSCRIBE#"));
        assert!(lines[2].ends_with("#room1#chat#PM_1#hello"));
    }

    #[tokio::test]
    async fn test_setup_switches_files() {
        let temp = tempdir().unwrap();
        let first = temp.path().join("first.log");
        let second = temp.path().join("second.log");

        let logger = ResultLogger::open(&first).await.unwrap();
        logger.write("one".to_string());
        logger.setup(&second).await.unwrap();
        logger.write("two".to_string());
        logger.shutdown().await.unwrap();

        assert_eq!(fs::read_to_string(&first).unwrap(), "one\n");
        assert_eq!(fs::read_to_string(&second).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn test_lines_before_setup_are_dropped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("late.log");

        let logger = ResultLogger::spawn();
        logger.write("early".to_string());
        logger.setup(&path).await.unwrap();
        logger.write("late".to_string());
        assert_eq!(logger.shutdown().await.unwrap(), 1);

        assert_eq!(fs::read_to_string(&path).unwrap(), "late\n");
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let logger = ResultLogger::spawn();
        assert!(logger.setup(blocker.join("run.log")).await.is_err());
        logger.write("dropped".to_string());
        assert_eq!(logger.shutdown().await.unwrap(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_writes_reported_on_shutdown() {
        let logger = ResultLogger::open("/dev/full").await.unwrap();
        logger.write("lost".to_string());
        let err = logger.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("1 result lines could not be written"));
    }

    #[tokio::test]
    async fn test_write_after_shutdown_does_not_panic() {
        let logger = ResultLogger::spawn();
        logger.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        logger.write("dropped".to_string());
        assert!(logger.shutdown().await.is_err());
    }
}
