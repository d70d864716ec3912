//! Per-asset completion events
//!
//! One [`AssetEvent`] is emitted for every asset a batch finishes. Sinks are
//! fire-and-forget: a failing sink logs a warning and never fails the batch.
//! The default sink appends JSON lines to `events.log` in the state directory.

use crate::config::{Config, ConfigManager};
use crate::report::PipelineReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Summary of one finished asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetEvent {
    pub timestamp: DateTime<Utc>,
    pub batch_id: Uuid,
    pub content_hash: Option<String>,
    pub path: PathBuf,
    pub passed: bool,
    pub stopped_at: Option<String>,
    pub total_cost: f64,
    pub cache_hit: bool,
}

impl AssetEvent {
    pub fn from_report(batch_id: Uuid, report: &PipelineReport) -> Self {
        Self {
            timestamp: Utc::now(),
            batch_id,
            content_hash: report.content_hash.clone(),
            path: report.path.clone(),
            passed: report.passed,
            stopped_at: report.stopped_at.clone(),
            total_cost: report.total_cost,
            cache_hit: report.cache_hit,
        }
    }
}

/// Destination for asset events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &AssetEvent);
}

/// Discards every event
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: &AssetEvent) {}
}

/// Appends events as JSON lines to a file
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, event: &AssetEvent) {
        let mut line = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize asset event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write events log {}: {}", self.path.display(), e);
        }
    }
}

/// Sink selected by `[general] events_log`
pub fn sink_from_config(config: &Config) -> Arc<dyn EventSink> {
    if config.general.events_log {
        Arc::new(JsonlEventSink::new(ConfigManager::events_log_path(config)))
    } else {
        Arc::new(NullEventSink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn event(path: &str, passed: bool) -> AssetEvent {
        let mut report = PipelineReport::failed(Path::new(path), "unused");
        report.error = None;
        report.passed = passed;
        report.content_hash = Some("ab".repeat(32));
        AssetEvent::from_report(Uuid::nil(), &report)
    }

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlEventSink::new(dir.path().join("state").join("events.log"));

        sink.emit(&event("/renders/a.png", true)).await;

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();

        assert_eq!(parsed["path"], "/renders/a.png");
        assert_eq!(parsed["passed"], true);
        assert_eq!(parsed["batch_id"], Uuid::nil().to_string());
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn appends_multiple_lines() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlEventSink::new(dir.path().join("events.log"));

        sink.emit(&event("/a.png", true)).await;
        sink.emit(&event("/b.png", false)).await;

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        assert_eq!(content.trim().lines().count(), 2);
    }

    #[tokio::test]
    async fn unwritable_path_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        let sink = JsonlEventSink::new(blocker.join("events.log"));

        sink.emit(&event("/a.png", true)).await;
        assert!(!blocker.join("events.log").exists());
    }
}
