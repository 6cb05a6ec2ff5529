//! Broker-agnostic seams between the connection supervisor and the handlers it drives.
//!
//! The rumqttc event loop is translated into [`TransportEvent`]s, and outgoing
//! subscriptions go through the [`Transport`] trait, so the discovery logic can be
//! exercised without a live broker.

use async_trait::async_trait;
use rumqttc::QoS;
use thiserror::Error;
use tracing::info;

/// Result code reported by the broker for an accepted connection
pub const CONNECTION_ACCEPTED: u8 = 0;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Subscription to '{filter}' failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("Invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("Invalid connection parameter: {0}")]
    InvalidParameter(String),
}

/// Notifications surfaced by the network session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt (initial or reconnect) is in progress
    Connecting,
    /// CONNACK received, or the broker refused the connection
    ConnAck { code: u8, session_present: bool },
    Publish { topic: String, payload: Vec<u8> },
    /// The session dropped; the transport will try again on its own
    ConnectionLost { reason: String },
    /// Raw diagnostic line from the transport
    Log(String),
}

/// Outgoing side of the broker session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;
}

/// Callbacks invoked by the connection supervisor, one at a time.
#[async_trait]
pub trait EventHandler: Send {
    /// Called after every CONNACK, successful or not
    async fn on_connect(&mut self, code: u8);

    async fn on_message(&mut self, topic: &str, payload: &[u8]);

    fn on_log(&self, line: &str) {
        info!("Log: {}", line);
    }
}

/// Maps the numeric QoS levels used in configuration onto rumqttc's enum.
pub fn qos_from_level(level: u8) -> Result<QoS, TransportError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransportError::InvalidQos(other)),
    }
}
