//! Asynchronous access log.
//!
//! Callers format a line and hand it to a bounded queue without waiting. A
//! writer task drains the queue in batches, appends to the log file and, on
//! its own cadence, checks the file size and rotates it:
//!
//! ```text
//! access.log   -> access.log.<tmp>
//! access.log.N -> access.log.N+1   (N = keep-1 .. 1)
//! access.log.<tmp> -> access.log.1
//! ```
//!
//! When the queue is full the line is dropped and counted. Logging never
//! blocks the operation being logged.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use parking_lot::Mutex;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AccessLogConfig;
use crate::context::OpContext;

enum Message {
    Line(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running access log.
#[derive(Debug)]
pub struct AccessLogger {
    tx: mpsc::Sender<Message>,
    dropped: Arc<AtomicU64>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl AccessLogger {
    /// Opens (or creates) the log file and starts the writer task.
    pub async fn open(config: AccessLogConfig) -> io::Result<Self> {
        let file = open_append(&config.path).await?;
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let path = config.path.clone();
        let writer = LogWriter {
            batch: Vec::with_capacity(config.batch_bytes),
            config,
            file,
            last_check: Instant::now(),
        };
        let handle = tokio::spawn(writer.run(rx));
        debug!(path = %path.display(), "access log opened");
        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            writer: Mutex::new(Some(handle)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one line for `ctx`. Returns `false` if the line was dropped.
    pub fn log(&self, ctx: &OpContext, command: fmt::Arguments<'_>) -> bool {
        let line = format_line(ctx, command);
        match self.tx.try_send(Message::Line(line)) {
            Ok(()) => true,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let mpsc::error::TrySendError::Full(Message::Line(line))
                | mpsc::error::TrySendError::Closed(Message::Line(line)) = err
                {
                    debug!("log dropped: {}", line.trim_end());
                }
                false
            }
        }
    }

    /// Lines dropped because the queue was full or the writer had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits until every line queued so far is written out.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Writes out queued lines and stops the writer task.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Message::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn format_line(ctx: &OpContext, command: fmt::Arguments<'_>) -> String {
    format!(
        "{} [uid:{},gid:{},pid:{}] {} <{:.6}>\n",
        Local::now().format("%Y.%m.%d %H:%M:%S%.6f"),
        ctx.uid,
        ctx.gid,
        ctx.pid,
        command,
        ctx.elapsed().as_secs_f64(),
    )
}

async fn open_append(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).await;
    }
    Ok(file)
}

fn generation(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

struct LogWriter {
    config: AccessLogConfig,
    file: File,
    batch: Vec<u8>,
    last_check: Instant,
}

impl LogWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        while let Some(mut message) = rx.recv().await {
            loop {
                match message {
                    Message::Line(line) => {
                        self.batch.extend_from_slice(line.as_bytes());
                        if self.batch.len() >= self.config.batch_bytes {
                            self.write_batch().await;
                        }
                    }
                    Message::Flush(ack) => {
                        self.write_batch().await;
                        self.maybe_rotate().await;
                        let _ = self.file.flush().await;
                        let _ = ack.send(());
                    }
                    Message::Shutdown(ack) => {
                        self.write_batch().await;
                        let _ = self.file.flush().await;
                        let _ = ack.send(());
                        debug!("access log closed");
                        return;
                    }
                }
                match rx.try_recv() {
                    Ok(next) => message = next,
                    Err(_) => break,
                }
            }
            self.write_batch().await;
            self.maybe_rotate().await;
        }
        self.write_batch().await;
        let _ = self.file.flush().await;
    }

    async fn write_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        if let Err(err) = self.file.write_all(&self.batch).await {
            warn!(path = %self.config.path.display(), error = %err, "write access log");
        }
        self.batch.clear();
    }

    async fn maybe_rotate(&mut self) {
        if self.last_check.elapsed() < self.config.check_interval {
            return;
        }
        self.last_check = Instant::now();
        let size = match self.file.metadata().await {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size > self.config.rotate_size {
            self.rotate(size).await;
        }
    }

    async fn rotate(&mut self, size: u64) {
        let path = self.config.path.clone();
        let _ = self.file.flush().await;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}", std::process::id()));
        let tmp = PathBuf::from(tmp);

        match fs::rename(&path, &tmp).await {
            Ok(()) => {
                for n in (1..self.config.keep).rev() {
                    let _ = fs::rename(generation(&path, n), generation(&path, n + 1)).await;
                }
                if self.config.keep == 0 {
                    let _ = fs::remove_file(&tmp).await;
                } else {
                    let _ = fs::rename(&tmp, generation(&path, 1)).await;
                }
                debug!(path = %path.display(), size, "access log rotated");
            }
            Err(err) => {
                let limit = self.config.rotate_size.saturating_mul(self.config.keep.max(1) as u64);
                if size > limit {
                    info!(path = %path.display(), error = %err, "can't rename access log, truncating it");
                    let _ = self.file.set_len(0).await;
                }
                return;
            }
        }

        match open_append(&path).await {
            Ok(file) => self.file = file,
            Err(err) => warn!(path = %path.display(), error = %err, "reopen access log"),
        }
    }
}
