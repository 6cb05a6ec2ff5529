use chrono::NaiveDateTime;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

const PREVIEW_LEN: usize = 32;

/// A message received on one of the per-device topic trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub device_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(PREVIEW_LEN).collect();
        write!(
            f,
            "{} [{}] {} - {}",
            self.received_at, self.device_id, self.topic, preview
        )
    }
}

impl TelemetryMessage {
    pub fn from_topic(device_id: &str, topic: &str, payload: &[u8]) -> Self {
        TelemetryMessage {
            device_id: device_id.to_string(),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            received_at: chrono::Local::now().naive_local(),
        }
    }
}

/// Destination for per-device telemetry. Payload handling lives behind this trait.
pub trait TelemetrySink: Send + Sync {
    fn deliver(&self, message: TelemetryMessage);
}

/// Bounded channel sink; a full or closed channel drops the message.
impl TelemetrySink for mpsc::Sender<TelemetryMessage> {
    fn deliver(&self, message: TelemetryMessage) {
        match self.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                warn!("Telemetry buffer full, dropping message on {}", msg.topic);
            }
            Err(TrySendError::Closed(msg)) => {
                warn!("Telemetry receiver closed, dropping message on {}", msg.topic);
            }
        }
    }
}
