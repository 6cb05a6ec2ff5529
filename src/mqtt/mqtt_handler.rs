use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnAck, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::message_manager::TelemetryMessage;
use super::topic_router::{TopicRouter, DISCOVERY_TOPIC};
use super::transport::{
    qos_from_level, EventHandler, Transport, TransportError, TransportEvent, CONNECTION_ACCEPTED,
};
use crate::config::{AppConfig, BrokerConfig};
use crate::registry::DeviceRegistry;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// rumqttc client as the outgoing half of the session.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Opens a broker session. No packets flow until the event loop is polled.
pub fn connect(broker: &BrokerConfig) -> Result<(MqttTransport, EventLoop), TransportError> {
    if broker.host.trim().is_empty() {
        return Err(TransportError::InvalidParameter(
            "broker address must not be empty".to_string(),
        ));
    }
    if broker.port == 0 {
        return Err(TransportError::InvalidParameter(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    if broker.keep_alive_secs == 0 {
        return Err(TransportError::InvalidParameter(
            "keep-alive must be at least one second".to_string(),
        ));
    }

    info!("Connecting to broker {}:{}", broker.host, broker.port);
    let mut mqtt_options = MqttOptions::new(&broker.client_id, &broker.host, broker.port);
    mqtt_options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
    if let (Some(user), Some(pw)) = (&broker.username, &broker.password) {
        mqtt_options.set_credentials(user.clone(), pw.clone());
    }

    let (client, event_loop) = AsyncClient::new(mqtt_options, broker.request_capacity.max(1));
    Ok((MqttTransport { client }, event_loop))
}

/// Drives the rumqttc event loop and forwards every notification as a [`TransportEvent`].
///
/// Reconnecting is left to rumqttc: after an error the next `poll` dials the broker
/// again. This loop only paces those attempts and stops once the receiver is gone.
///
/// The events channel is unbounded. `poll` is the only thing draining the rumqttc
/// request queue, so this loop must never wait on the supervisor, which may itself
/// be waiting for room in that queue.
pub fn spawn_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut error_count: u32 = 0;
        let mut connecting = true;

        loop {
            if connecting && events.send(TransportEvent::Connecting).is_err() {
                break;
            }
            connecting = false;

            let translated = match event_loop.poll().await {
                Ok(event) => {
                    let mut out = vec![TransportEvent::Log(format!("{:?}", event))];
                    match event {
                        Event::Incoming(Packet::ConnAck(ConnAck {
                            code,
                            session_present,
                        })) => {
                            error_count = 0;
                            out.push(TransportEvent::ConnAck {
                                code: code as u8,
                                session_present,
                            });
                        }
                        Event::Incoming(Packet::Publish(p)) => {
                            out.push(TransportEvent::Publish {
                                topic: p.topic,
                                payload: p.payload.to_vec(),
                            });
                        }
                        _ => {}
                    }
                    out
                }
                Err(ConnectionError::ConnectionRefused(code)) => {
                    error_count += 1;
                    connecting = true;
                    vec![TransportEvent::ConnAck {
                        code: code as u8,
                        session_present: false,
                    }]
                }
                Err(e) => {
                    error_count += 1;
                    connecting = true;
                    vec![TransportEvent::ConnectionLost {
                        reason: e.to_string(),
                    }]
                }
            };

            for event in translated {
                if events.send(event).is_err() {
                    debug!("Event receiver dropped, stopping event loop");
                    return;
                }
            }

            if error_count > 0 && connecting {
                let delay = (INITIAL_RETRY_DELAY * 2_u32.pow((error_count - 1).min(10)))
                    .min(MAX_RETRY_DELAY);
                warn!(delay = ?delay, error_count, "Retrying MQTT connection");
                time::sleep(delay).await;
            }
        }
    })
}

/// Owns the connection state and feeds transport events to the handler.
///
/// Every accepted CONNACK, including reconnects, subscribes to the discovery
/// topic before the handler sees it.
pub struct ConnectionSupervisor<H: EventHandler> {
    transport: Arc<dyn Transport>,
    handler: H,
    qos: QoS,
    state: watch::Sender<ConnectionState>,
}

impl<H: EventHandler> ConnectionSupervisor<H> {
    pub fn new(transport: Arc<dyn Transport>, handler: H, qos: QoS) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionSupervisor {
            transport,
            handler,
            qos,
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Connection state {:?} -> {:?}", previous, next);
        }
    }

    pub async fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => self.set_state(ConnectionState::Connecting),
            TransportEvent::ConnAck { code, .. } if code == CONNECTION_ACCEPTED => {
                info!("Connected with result code {}", code);
                self.set_state(ConnectionState::Connected);
                if let Err(e) = self.transport.subscribe(DISCOVERY_TOPIC, self.qos).await {
                    error!("Failed to subscribe to discovery topic: {}", e);
                }
                self.handler.on_connect(code).await;
            }
            TransportEvent::ConnAck { code, .. } => {
                error!("Bad connection. Returned result code: {}", code);
                self.set_state(ConnectionState::Failed);
                self.handler.on_connect(code).await;
            }
            TransportEvent::Publish { topic, payload } => {
                self.handler.on_message(&topic, &payload).await;
            }
            TransportEvent::ConnectionLost { reason } => {
                warn!("Connection lost: {}", reason);
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEvent::Log(line) => self.handler.on_log(&line),
        }
    }

    /// Processes events until the sending side closes.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("Transport event stream closed");
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Handles to a running discovery session.
pub struct DiscoveryHandle {
    pub registry: Arc<DeviceRegistry>,
    pub state: watch::Receiver<ConnectionState>,
    pub event_loop: JoinHandle<()>,
    pub supervisor: JoinHandle<()>,
}

/// Connects to the configured broker and starts the discovery subscription manager.
pub fn start(
    config: &AppConfig,
    telemetry: mpsc::Sender<TelemetryMessage>,
) -> Result<DiscoveryHandle, TransportError> {
    let broker = &config.broker;
    let qos = qos_from_level(config.discovery.qos)?;

    let (transport, event_loop) = connect(broker)?;
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let registry = Arc::new(DeviceRegistry::new());
    let router = TopicRouter::new(registry.clone(), transport.clone(), telemetry, qos)
        .resubscribe_on_reconnect(config.discovery.resubscribe_devices_on_reconnect);

    let supervisor = ConnectionSupervisor::new(transport, router, qos);
    let state = supervisor.watch_state();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let event_loop = spawn_event_loop(event_loop, events_tx);
    let supervisor = tokio::spawn(supervisor.run(events_rx));

    Ok(DiscoveryHandle {
        registry,
        state,
        event_loop,
        supervisor,
    })
}
