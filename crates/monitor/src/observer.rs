//! Run observation
//!
//! Every state transition of a run becomes a `MonitorRecord` handed to an
//! `Observer`. The default observer forwards to `tracing`; tests and UIs can
//! listen on a broadcast channel instead.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::orchestrator::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One observable step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub level: LogLevel,
    pub run_id: Uuid,
    /// URL, or path name for DIFF runs
    pub url: String,
    pub state: RunState,
    pub message: String,
}

pub trait Observer: Send + Sync {
    fn record(&self, record: &MonitorRecord);
}

/// Forwards records to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, record: &MonitorRecord) {
        let run_id = record.run_id;
        let state = record.state;
        let url = record.url.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(%run_id, ?state, url, "{}", record.message),
            LogLevel::Info => tracing::info!(%run_id, ?state, url, "{}", record.message),
            LogLevel::Warning => tracing::warn!(%run_id, ?state, url, "{}", record.message),
            LogLevel::Error => tracing::error!(%run_id, ?state, url, "{}", record.message),
        }
    }
}

/// Publishes records on a broadcast channel, like the browser `EventBus`
pub struct ChannelObserver {
    tx: broadcast::Sender<MonitorRecord>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorRecord> {
        self.tx.subscribe()
    }
}

impl Default for ChannelObserver {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Observer for ChannelObserver {
    fn record(&self, record: &MonitorRecord) {
        let _ = self.tx.send(record.clone()); // Ignore error if no subscribers
    }
}

/// Shared observer handle
pub type SharedObserver = Arc<dyn Observer>;

/// Records of one run, stamped with its id
pub(crate) struct RunLog {
    observer: SharedObserver,
    pub(crate) run_id: Uuid,
    url: String,
}

impl RunLog {
    pub(crate) fn new(observer: SharedObserver, url: impl Into<String>) -> Self {
        Self {
            observer,
            run_id: Uuid::now_v7(),
            url: url.into(),
        }
    }

    pub(crate) fn emit(&self, level: LogLevel, state: RunState, message: impl Into<String>) {
        self.observer.record(&MonitorRecord {
            level,
            run_id: self.run_id,
            url: self.url.clone(),
            state,
            message: message.into(),
        });
    }

    pub(crate) fn state(&self, state: RunState, message: impl Into<String>) {
        let level = match state {
            RunState::Failed => LogLevel::Error,
            RunState::Idle | RunState::Loading | RunState::Walking | RunState::Diffing => {
                LogLevel::Debug
            }
            _ => LogLevel::Info,
        };
        self.emit(level, state, message);
    }
}
