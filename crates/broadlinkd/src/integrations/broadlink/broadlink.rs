use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::config::EntryConfig;
use super::device::BroadlinkDevice;
use super::device::DeviceConnector;
use super::entries::ConfigEntries;
use super::sensor;
use super::sensor::BroadlinkSensor;
use super::sensor::ListenerRegistration;
use super::BroadlinkConfig;
use super::DOMAIN;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// A sensor added to the engine together with its listener registration
struct RegisteredSensor {
    sensor: Arc<Mutex<BroadlinkSensor>>,
    _listener: ListenerRegistration,
}

/// Broadlink integration for broadlinkd
///
/// Sets up one device per configuration entry and exposes its readings as
/// sensor entities.
pub struct BroadlinkIntegration<C: DeviceConnector> {
    connector: C,
    config: BroadlinkConfig,
    entries: ConfigEntries,
    devices: HashMap<String, BroadlinkDevice>,
    sensors: HashMap<String, RegisteredSensor>,
    to_engine: Option<FromIntegrationSender>,
}

impl<C: DeviceConnector> BroadlinkIntegration<C> {
    pub fn new(connector: C, config: &BroadlinkConfig) -> Self {
        Self {
            connector,
            config: config.clone(),
            entries: ConfigEntries::new(config.entries.clone()),
            devices: HashMap::new(),
            sensors: HashMap::new(),
            to_engine: None,
        }
    }

    /// Set up the device and sensors of one configuration entry
    async fn setup_entry(
        &mut self,
        entry: &EntryConfig,
        to_engine: &FromIntegrationSender,
    ) -> Result<(), Box<dyn Error + Send>> {
        let api = self.connector.connect(entry);
        let device = BroadlinkDevice::setup(entry, api)
            .await
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;

        let mut added = Vec::new();
        sensor::setup_entry(&device, |sensors| added = sensors)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;

        Self::send(
            to_engine,
            FromIntegrationMessage::DeviceDiscovered {
                device: device.device_info(),
                integration_name: DOMAIN.to_string(),
            },
        )
        .await;

        let count = added.len();
        for sensor in added {
            self.add_entity(sensor, to_engine).await;
        }

        info!(
            "[{}] Set up {} sensor(s) for {}",
            entry.entry_id, count, device.name
        );

        self.devices.insert(entry.entry_id.clone(), device);
        Ok(())
    }

    /// Register a sensor with the engine, write its initial state and
    /// subscribe it to its coordinator
    async fn add_entity(&mut self, mut sensor: BroadlinkSensor, to_engine: &FromIntegrationSender) {
        let entity_id = self.unique_entity_id(sensor.entity_id());
        sensor.set_entity_id(entity_id.clone());
        debug!(
            "Adding {} entity {}: {}",
            sensor.platform(),
            entity_id,
            sensor.state_json()
        );

        Self::send(
            to_engine,
            FromIntegrationMessage::EntityDiscovered {
                entity_id: entity_id.clone(),
                integration_name: DOMAIN.to_string(),
                device_id: Some(sensor.device_id().to_string()),
            },
        )
        .await;

        Self::send(
            to_engine,
            FromIntegrationMessage::SensorStateChanged {
                entity_id: entity_id.clone(),
                state: sensor.sensor_state(),
            },
        )
        .await;

        let sensor = Arc::new(Mutex::new(sensor));
        let listener = BroadlinkSensor::added_to_host(sensor.clone(), to_engine.clone()).await;
        self.sensors.insert(
            entity_id,
            RegisteredSensor {
                sensor,
                _listener: listener,
            },
        );
    }

    /// Append `_2`, `_3`, ... until the entity ID is free
    fn unique_entity_id(&self, preferred: &str) -> String {
        if !self.sensors.contains_key(preferred) {
            return preferred.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", preferred, n))
            .find(|candidate| !self.sensors.contains_key(candidate))
            .unwrap_or_else(|| preferred.to_string())
    }

    async fn send(to_engine: &FromIntegrationSender, msg: FromIntegrationMessage) {
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send message to engine: {}", e);
        }
    }

    /// Ask an entity to update
    async fn update_entity(&self, entity_id: &str) -> Result<(), Box<dyn Error + Send>> {
        let registered = self
            .sensors
            .get(entity_id)
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Sensor not found: {}", entity_id),
                ))
            })?;

        // Refreshes run detached so requests for sibling sensors overlap and
        // the coordinator can coalesce them into one fetch
        let refresh = registered.sensor.lock().await.update();
        tokio::spawn(refresh);
        Ok(())
    }
}

#[async_trait]
impl<C: DeviceConnector + 'static> Integration for BroadlinkIntegration<C> {
    fn name(&self) -> &str {
        DOMAIN
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.to_engine = Some(tx.clone());

        for legacy in &self.config.sensor {
            sensor::setup_platform(legacy, &self.entries);
        }

        for flow in self.entries.pending_flows() {
            info!(
                "Import flow for {} is waiting for a configuration entry; \
                add an [[integrations.broadlink.entries]] block with its mac, name and type",
                flow.host
            );
        }

        let entries = self.entries.entries().to_vec();
        for entry in &entries {
            if let Err(e) = self.setup_entry(entry, &tx).await {
                error!("[{}] Failed to set up entry: {}", entry.entry_id, e);
            }
        }

        info!(
            "Broadlink integration ready: {} device(s), {} sensor(s)",
            self.devices.len(),
            self.sensors.len()
        );
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::UpdateEntity { entity_id } => {
                self.update_entity(&entity_id).await?;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Broadlink integration shutting down");

        // Dropping a registration releases its coordinator listener
        let removed: Vec<String> = self.sensors.drain().map(|(entity_id, _)| entity_id).collect();
        if let Some(tx) = &self.to_engine {
            for entity_id in removed {
                Self::send(tx, FromIntegrationMessage::EntityRemoved { entity_id }).await;
            }
        }

        self.devices.clear();
        Ok(())
    }
}
