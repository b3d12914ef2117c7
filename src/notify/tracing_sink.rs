//! Sink that writes each event to the log as one JSON line.

use super::{EngineEvent, EventSink, SinkError};
use async_trait::async_trait;
use tracing::info;

/// Default sink for the binary.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        TracingSink
    }
}

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, event: &EngineEvent) -> Result<(), SinkError> {
        let payload =
            serde_json::to_string(event).map_err(|e| SinkError::Serialization(e.to_string()))?;
        info!(
            target: "chitfund::events",
            event = event.name(),
            group_id = %event.group_id(),
            payload = %payload,
            "Engine event"
        );
        Ok(())
    }
}
