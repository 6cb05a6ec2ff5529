//! # MQTT Device Discovery
//!
//! Listens for device announcements on the well-known `device/` topic and subscribes
//! to each announced device's topic tree as it appears.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── transport.rs        - Transport / EventHandler traits and transport events
//! ├── mqtt_handler.rs     - rumqttc session, event loop and connection supervisor
//! ├── topic_router.rs     - topic classification and dynamic subscriptions
//! └── message_manager.rs  - telemetry messages and the sink they are routed to
//! ```
//!
//! ## Control Flow
//!
//! ```text
//! EventLoop::poll ──► TransportEvent ──► ConnectionSupervisor ──► TopicRouter
//!  (network task)   (unbounded channel)   (state, device/ sub)     (registry, device/<id>/#)
//! ```
//!
//! The event loop runs on its own task and never waits on handler work. All handler
//! callbacks run sequentially on the supervisor task, which is the only writer of
//! the device registry.
//!
//! ## Reconnects
//!
//! rumqttc redials the broker by itself. Each accepted CONNACK resubscribes the
//! discovery topic. Per-device subscriptions are only restored when
//! `resubscribe_devices_on_reconnect` is enabled; otherwise devices found before a
//! disconnect stop delivering telemetry until the broker session is restored.

pub mod message_manager;
pub mod mqtt_handler;
pub mod topic_router;
pub mod transport;
