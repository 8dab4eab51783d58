use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const NO_LOG: &str = "No log available";

/// Per-service append-only log files, one line per event:
/// `[<timestamp>] - <message>`.
///
/// Writers are opened lazily and kept until [`ServiceLog::close`]. Each
/// service has its own writer lock so lines from the monitor and the worker
/// pool never interleave.
pub struct ServiceLog {
    directory: PathBuf,
    debug: bool,
    writers: Mutex<HashMap<String, Arc<Mutex<File>>>>,
}

impl ServiceLog {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            debug: false,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Keep debug-level lines in the files, not only in process logging.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn path(&self, service_id: &str) -> PathBuf {
        self.directory.join(format!("{service_id}.log"))
    }

    pub async fn info(&self, service_id: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(service_id, "{message}");
        self.append(service_id, message).await;
    }

    pub async fn debug(&self, service_id: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(service_id, "{message}");
        if self.debug {
            self.append(service_id, message).await;
        }
    }

    pub async fn error(&self, service_id: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(service_id, "{message}");
        self.append(service_id, message).await;
    }

    async fn writer(&self, service_id: &str) -> std::io::Result<Arc<Mutex<File>>> {
        let mut writers = self.writers.lock().await;
        if let Some(writer) = writers.get(service_id) {
            return Ok(writer.clone());
        }
        tokio::fs::create_dir_all(&self.directory).await?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(service_id))
            .await?;
        let writer = Arc::new(Mutex::new(file));
        writers.insert(service_id.to_string(), writer.clone());
        Ok(writer)
    }

    async fn append(&self, service_id: &str, message: &str) {
        let line = format_line(message);
        let result = async {
            let writer = self.writer(service_id).await?;
            let mut file = writer.lock().await;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(service_id, error = %e, "failed to write service log");
        }
    }

    /// Release the writer for a service. The file stays on disk.
    pub async fn close(&self, service_id: &str) {
        let writer = self.writers.lock().await.remove(service_id);
        if let Some(writer) = writer {
            let mut file = writer.lock().await;
            file.flush().await.ok();
        }
    }

    /// Close and delete the log of a service.
    pub async fn remove(&self, service_id: &str) {
        self.close(service_id).await;
        let path = self.path(service_id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(service_id, error = %e, "failed to remove service log");
            }
        }
    }

    pub async fn read(&self, service_id: &str) -> String {
        read_or_placeholder(&self.path(service_id)).await
    }
}

fn format_line(message: &str) -> String {
    format!(
        "[{}] - {message}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

async fn read_or_placeholder(path: &Path) -> String {
    tokio::fs::read_to_string(path)
        .await
        .unwrap_or_else(|_| NO_LOG.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLog::new(dir.path().to_path_buf());
        log.info("dv-orders", "Publishing - Configuring ...").await;
        log.error("dv-orders", "Publishing - Build failed").await;

        let content = log.read("dv-orders").await;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] - Publishing - Configuring ..."));
        let stamp = &lines[0][1..lines[0].find(']').unwrap()];
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[tokio::test]
    async fn close_keeps_the_file_and_reopens_for_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLog::new(dir.path().to_path_buf());
        log.info("dv-a", "one").await;
        log.close("dv-a").await;
        log.info("dv-a", "two").await;
        assert_eq!(log.read("dv-a").await.lines().count(), 2);
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLog::new(dir.path().to_path_buf());
        log.info("dv-a", "one").await;
        log.remove("dv-a").await;
        assert!(!log.path("dv-a").exists());
        assert_eq!(log.read("dv-a").await, NO_LOG);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ServiceLog::new(dir.path().to_path_buf()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..20 {
                    log.info("dv-a", format!("writer {i} line {j}")).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let content = log.read("dv-a").await;
        assert_eq!(content.lines().count(), 160);
        assert!(content.lines().all(|l| l.contains("] - writer ")));
    }

    #[tokio::test]
    async fn debug_lines_need_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let quiet = ServiceLog::new(dir.path().to_path_buf());
        quiet.debug("dv-a", "tick").await;
        assert_eq!(quiet.read("dv-a").await, NO_LOG);

        let verbose = ServiceLog::new(dir.path().to_path_buf()).with_debug(true);
        verbose.debug("dv-a", "tick").await;
        assert!(verbose.read("dv-a").await.ends_with("] - tick\n"));
    }

    #[tokio::test]
    async fn missing_log_reads_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let log = ServiceLog::new(dir.path().to_path_buf());
        assert_eq!(log.read("dv-none").await, NO_LOG);
    }
}
