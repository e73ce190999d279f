//! Alert events and their delivery queue
//!
//! The monitor and ledger only produce `AlertEvent`s. Delivery runs on a
//! dedicated worker behind a bounded channel so a slow sink never stalls a
//! request path; when the channel is full the event is dropped and counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

/// A threshold breach or budget warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AlertEvent {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata field
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
}

/// Destination for alerts (paging, e-mail, chat, logs)
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError>;

    /// Sink name for logging
    fn name(&self) -> &'static str;
}

/// Sink that writes alerts to the tracing log
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        match event.level {
            AlertLevel::Info => info!(severity = event.level.as_str(), "Alert: {}", event.message),
            AlertLevel::Warning => warn!(severity = event.level.as_str(), "Alert: {}", event.message),
            AlertLevel::Critical => error!(severity = event.level.as_str(), "Alert: {}", event.message),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Bounded hand-off to an alert delivery worker
#[derive(Debug, Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<AlertEvent>,
    dropped: Arc<AtomicU64>,
}

impl AlertQueue {
    /// Start a worker delivering to `sink`. The worker stops once every
    /// queue handle has been dropped and the backlog is delivered.
    pub fn spawn(sink: Arc<dyn AlertSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.deliver(&event).await {
                    warn!("Alert sink '{}' failed: {}", sink.name(), e);
                }
            }
            debug!("Alert worker for '{}' stopped", sink.name());
        });

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, event: AlertEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert queue full or closed, dropping alert: {}", e.into_inner().message);
                false
            }
        }
    }

    /// Queue every event, returning how many were accepted
    pub fn enqueue_all(&self, events: impl IntoIterator<Item = AlertEvent>) -> usize {
        events.into_iter().filter(|e| self.enqueue(e.clone())).count()
    }

    /// Events dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
