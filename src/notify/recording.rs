//! Sink that keeps events in memory, for tests.

use super::{EngineEvent, EventSink, SinkError};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Records every published event; optionally refuses them all.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
    failing: bool,
}

impl RecordingSink {
    /// Create a sink that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish with `SinkError::Unavailable`. Rejected events
    /// are still recorded so tests can see what was attempted.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub async fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().await.clone()
    }

    /// Names of recorded events, in publish order.
    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.name()).collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: &EngineEvent) -> Result<(), SinkError> {
        self.events.lock().await.push(event.clone());
        if self.failing {
            return Err(SinkError::Unavailable("recording sink set to fail".to_string()));
        }
        Ok(())
    }
}
