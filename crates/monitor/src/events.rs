use crate::error::SinkError;
use async_trait::async_trait;
use scriptwatch_diff::{DiffStats, Strategy};
use scriptwatch_store::{DiffId, ResourceId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Emitted once per check that decided `changed = true`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource_id: ResourceId,
    pub url: String,
    pub confidence: f64,
    pub diff_id: DiffId,
    pub strategy: Strategy,
    pub summary: DiffStats,
}

/// Receives change notifications. Failures are logged by the caller and
/// never retried.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &ChangeEvent) -> Result<(), SinkError>;
}

/// Logs every event at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        log::info!(
            "Change detected in {} ({}): confidence {:.3}, +{} -{} ~{}, diff {}",
            event.resource_id,
            event.url,
            event.confidence,
            event.summary.added,
            event.summary.removed,
            event.summary.modified,
            event.diff_id
        );
        Ok(())
    }
}

/// Forwards events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ChangeEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| SinkError("event receiver dropped".into()))
    }
}
