//! Topic router for discovery and per-device telemetry
//!
//! Every inbound publish is classified by topic shape:
//!
//! ```text
//! device/              ──► discovery: payload is a device id
//! device/<id>[/...]    ──► telemetry for <id>, handed to the sink untouched
//! anything else        ──► ignored
//! ```
//!
//! A discovery announcement for an unseen id appends it to the [`DeviceRegistry`]
//! and subscribes to `device/<id>/#` for every known id. Repeated announcements
//! leave the registry and the subscriptions alone.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::QoS;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::message_manager::{TelemetryMessage, TelemetrySink};
use super::transport::{EventHandler, Transport, CONNECTION_ACCEPTED};
use crate::registry::DeviceRegistry;

/// Fixed topic on which devices announce their identifier
pub const DISCOVERY_TOPIC: &str = "device/";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Discovery payload is not valid UTF-8: {0}")]
    InvalidDeviceId(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Discovery,
    Telemetry { device_id: &'a str },
    Unrecognized,
}

pub fn classify(topic: &str) -> TopicKind<'_> {
    if topic == DISCOVERY_TOPIC {
        return TopicKind::Discovery;
    }
    match topic.strip_prefix(DISCOVERY_TOPIC) {
        Some(rest) => {
            let device_id = rest.split('/').next().unwrap_or_default();
            if device_id.is_empty() {
                TopicKind::Unrecognized
            } else {
                TopicKind::Telemetry { device_id }
            }
        }
        None => TopicKind::Unrecognized,
    }
}

/// Wildcard filter covering everything a device publishes under its namespace
pub fn device_filter(device_id: &str) -> String {
    format!("{}{}/#", DISCOVERY_TOPIC, device_id)
}

pub struct TopicRouter<S: TelemetrySink> {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn Transport>,
    sink: S,
    qos: QoS,
    resubscribe_on_reconnect: bool,
}

impl<S: TelemetrySink> TopicRouter<S> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn Transport>,
        sink: S,
        qos: QoS,
    ) -> Self {
        TopicRouter {
            registry,
            transport,
            sink,
            qos,
            resubscribe_on_reconnect: false,
        }
    }

    /// Reissue every per-device subscription after each successful connect.
    ///
    /// Off by default: a reconnect then only restores the discovery subscription.
    pub fn resubscribe_on_reconnect(mut self, enabled: bool) -> Self {
        self.resubscribe_on_reconnect = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub async fn handle_discovery(&mut self, payload: &[u8]) -> Result<(), RouteError> {
        let device_id = std::str::from_utf8(payload)?;

        info!("Device found...");
        info!("{}", device_id);

        let changed = self.registry.add(device_id).await;
        let devices = self.registry.all().await;

        info!("Devices subscribed:");
        info!("{:?}", devices);

        if changed {
            self.subscribe_devices(&devices).await;
        }
        Ok(())
    }

    fn handle_telemetry(&self, device_id: &str, topic: &str, payload: &[u8]) {
        debug!(device_id, topic, bytes = payload.len(), "Routing telemetry");
        self.sink
            .deliver(TelemetryMessage::from_topic(device_id, topic, payload));
    }

    async fn subscribe_devices(&self, devices: &[String]) {
        for device_id in devices {
            let filter = device_filter(device_id);
            if let Err(e) = self.transport.subscribe(&filter, self.qos).await {
                error!("Failed to subscribe to {}: {}", filter, e);
            }
        }
    }
}

#[async_trait]
impl<S: TelemetrySink> EventHandler for TopicRouter<S> {
    async fn on_connect(&mut self, code: u8) {
        if code != CONNECTION_ACCEPTED || !self.resubscribe_on_reconnect {
            return;
        }
        let devices = self.registry.all().await;
        if !devices.is_empty() {
            info!("Restoring {} device subscriptions", devices.len());
            self.subscribe_devices(&devices).await;
        }
    }

    async fn on_message(&mut self, topic: &str, payload: &[u8]) {
        match classify(topic) {
            TopicKind::Discovery => {
                if let Err(e) = self.handle_discovery(payload).await {
                    warn!("Skipping discovery message: {}", e);
                }
            }
            TopicKind::Telemetry { device_id } => {
                self.handle_telemetry(device_id, topic, payload);
            }
            TopicKind::Unrecognized => {
                debug!("Ignoring message on unrecognized topic {}", topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::transport::test_support::RecordingTransport;
    use tokio::sync::mpsc;

    fn router(
        transport: Arc<RecordingTransport>,
    ) -> (
        TopicRouter<mpsc::Sender<TelemetryMessage>>,
        mpsc::Receiver<TelemetryMessage>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let router = TopicRouter::new(
            Arc::new(DeviceRegistry::new()),
            transport,
            tx,
            QoS::AtMostOnce,
        );
        (router, rx)
    }

    #[test]
    fn classifies_topic_shapes() {
        assert_eq!(classify("device/"), TopicKind::Discovery);
        assert_eq!(
            classify("device/abc123/temp"),
            TopicKind::Telemetry { device_id: "abc123" }
        );
        assert_eq!(
            classify("device/abc123"),
            TopicKind::Telemetry { device_id: "abc123" }
        );
        assert_eq!(classify("device"), TopicKind::Unrecognized);
        assert_eq!(classify("device//x"), TopicKind::Unrecognized);
        assert_eq!(classify("sensors/abc"), TopicKind::Unrecognized);
        assert_eq!(classify(""), TopicKind::Unrecognized);
    }

    #[test]
    fn builds_device_wildcard() {
        assert_eq!(device_filter("dev-42"), "device/dev-42/#");
    }

    #[tokio::test]
    async fn new_device_is_registered_and_subscribed() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, _rx) = router(transport.clone());

        router.on_message("device/", b"dev-42").await;

        assert_eq!(router.registry().all().await, vec!["dev-42"]);
        assert_eq!(transport.subscriptions(), vec!["device/dev-42/#"]);
    }

    #[tokio::test]
    async fn repeated_announcements_are_idempotent() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, _rx) = router(transport.clone());

        for _ in 0..5 {
            router.on_message("device/", b"dev-42").await;
        }

        assert_eq!(router.registry().all().await, vec!["dev-42"]);
        assert_eq!(transport.count("device/dev-42/#"), 1);
    }

    #[tokio::test]
    async fn new_device_resubscribes_every_known_device() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, _rx) = router(transport.clone());

        router.on_message("device/", b"A").await;
        router.on_message("device/", b"B").await;
        router.on_message("device/", b"A").await;

        assert_eq!(router.registry().all().await, vec!["A", "B"]);
        assert_eq!(
            transport.subscriptions(),
            vec!["device/A/#", "device/A/#", "device/B/#"]
        );
    }

    #[tokio::test]
    async fn telemetry_goes_to_sink_without_touching_registry() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, mut rx) = router(transport.clone());

        router.on_message("device/abc123/temp", b"21.5").await;

        assert!(router.registry().is_empty().await);
        assert!(transport.subscriptions().is_empty());
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.device_id, "abc123");
        assert_eq!(msg.topic, "device/abc123/temp");
        assert_eq!(msg.payload, b"21.5");
    }

    #[tokio::test]
    async fn unrecognized_topics_are_ignored() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, mut rx) = router(transport.clone());

        router.on_message("weather/today", b"sunny").await;

        assert!(router.registry().is_empty().await);
        assert!(transport.subscriptions().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_utf8_discovery_payload_is_skipped() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, _rx) = router(transport.clone());

        assert!(matches!(
            router.handle_discovery(&[0xc3, 0x28]).await,
            Err(RouteError::InvalidDeviceId(_))
        ));
        router.on_message("device/", &[0xc3, 0x28]).await;
        router.on_message("device/", b"ok").await;

        assert_eq!(router.registry().all().await, vec!["ok"]);
    }

    #[tokio::test]
    async fn failed_subscription_keeps_the_device() {
        let transport = Arc::new(RecordingTransport::default());
        transport.reject("device/bad/#");
        let (mut router, _rx) = router(transport.clone());

        router.on_message("device/", b"bad").await;
        router.on_message("device/", b"good").await;

        assert_eq!(router.registry().all().await, vec!["bad", "good"]);
        assert_eq!(transport.count("device/good/#"), 1);
    }

    #[tokio::test]
    async fn reconnect_restores_devices_only_when_enabled() {
        let transport = Arc::new(RecordingTransport::default());
        let (router, _rx) = router(transport.clone());
        let mut router = router.resubscribe_on_reconnect(true);

        router.on_message("device/", b"A").await;
        router.on_message("device/", b"B").await;
        transport.clear();

        router.on_connect(5).await;
        assert!(transport.subscriptions().is_empty());

        router.on_connect(CONNECTION_ACCEPTED).await;
        assert_eq!(transport.subscriptions(), vec!["device/A/#", "device/B/#"]);
    }

    #[tokio::test]
    async fn reconnect_leaves_devices_alone_by_default() {
        let transport = Arc::new(RecordingTransport::default());
        let (mut router, _rx) = router(transport.clone());

        router.on_message("device/", b"A").await;
        transport.clear();
        router.on_connect(CONNECTION_ACCEPTED).await;

        assert!(transport.subscriptions().is_empty());
    }
}
