//! In-memory registry of discovered devices
//!
//! Devices announce themselves on the discovery topic and are appended here in the
//! order they were first seen. Entries are never removed and nothing is persisted;
//! a restart starts from an empty registry.
//!
//! The registry is shared between the topic router (the only writer) and readers
//! such as the shutdown summary, so the list sits behind a `tokio::sync::RwLock`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// A discovered device.
///
/// Only `id` and `discovered_at` are filled in by discovery. The descriptive fields
/// belong to the device database and stay empty here.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DeviceRecord {
    pub id: String,
    pub discovered_at: DateTime<Utc>,
    pub device_type: Option<String>,
    pub local_ip: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl DeviceRecord {
    pub fn discovered(id: impl Into<String>) -> Self {
        DeviceRecord {
            id: id.into(),
            discovered_at: Utc::now(),
            device_type: None,
            local_ip: None,
            location: None,
            latitude: None,
            longitude: None,
        }
    }
}

#[derive(Default, Debug)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.iter().any(|d| d.id == id)
    }

    /// Appends `id` unless it is already known.
    ///
    /// Returns `true` when the registry changed. The membership check and the
    /// insert happen under one write lock.
    pub async fn add(&self, id: &str) -> bool {
        let mut devices = self.devices.write().await;
        if devices.iter().any(|d| d.id == id) {
            debug!("Device {} already registered", id);
            return false;
        }
        devices.push(DeviceRecord::discovered(id));
        true
    }

    /// Known identifiers in discovery order.
    pub async fn all(&self) -> Vec<String> {
        self.devices
            .read()
            .await
            .iter()
            .map(|d| d.id.clone())
            .collect()
    }

    pub async fn records(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
