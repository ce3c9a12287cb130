use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::config::EntryConfig;
use super::coordinator::Coordinator;
use super::coordinator::CoordinatorError;
use super::coordinator::UpdateCoordinator;
use super::DOMAIN;
use crate::engine;

/// Latest readings of a device, keyed by monitored condition
pub type SensorData = BTreeMap<String, f64>;

/// Device type that reports every condition, including zero readings
pub const A1_DEVICE_TYPE: &str = "A1";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device at {host} did not respond")]
    Timeout { host: String },

    #[error("I/O error talking to {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Operations the sensor platform needs from a Broadlink device driver
///
/// The transport lives behind this trait; implementations own connection
/// handling and authentication.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Device type string as reported by the hub (e.g. "A1")
    fn device_type(&self) -> &str;

    /// Host the device was configured with
    fn host(&self) -> &str;

    /// Read the current sensor values
    async fn check_sensors(&self) -> Result<SensorData, DeviceError>;
}

/// Backend that reports the readings from the entry configuration
///
/// Used where no transport for the hub is available.
#[derive(Debug, Clone)]
pub struct SimulatedApi {
    host: String,
    device_type: String,
    readings: SensorData,
}

impl SimulatedApi {
    pub fn from_entry(entry: &EntryConfig) -> Self {
        Self {
            host: entry.host.clone(),
            device_type: entry.device_type.clone(),
            readings: entry.readings.clone(),
        }
    }
}

#[async_trait]
impl DeviceApi for SimulatedApi {
    fn device_type(&self) -> &str {
        &self.device_type
    }

    fn host(&self) -> &str {
        &self.host
    }

    async fn check_sensors(&self) -> Result<SensorData, DeviceError> {
        Ok(self.readings.clone())
    }
}

/// Creates the driver for a configuration entry
pub trait DeviceConnector: Send + Sync {
    fn connect(&self, entry: &EntryConfig) -> Arc<dyn DeviceApi>;
}

/// Connects every entry to a [`SimulatedApi`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedConnector;

impl DeviceConnector for SimulatedConnector {
    fn connect(&self, entry: &EntryConfig) -> Arc<dyn DeviceApi> {
        Arc::new(SimulatedApi::from_entry(entry))
    }
}

/// Normalize a MAC address to lowercase hex without separators
pub fn format_unique_id(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A configured Broadlink device with its update coordinator
pub struct BroadlinkDevice {
    pub entry_id: String,
    pub name: String,
    pub unique_id: String,
    pub mac_address: String,
    pub manufacturer: String,
    pub model: Option<String>,
    pub fw_version: Option<String>,
    api: Arc<dyn DeviceApi>,
    coordinator: Arc<dyn Coordinator>,
}

impl BroadlinkDevice {
    pub fn new(
        entry: &EntryConfig,
        api: Arc<dyn DeviceApi>,
        coordinator: Arc<dyn Coordinator>,
    ) -> Self {
        Self {
            entry_id: entry.entry_id.clone(),
            name: entry.name.clone(),
            unique_id: format_unique_id(&entry.mac),
            mac_address: entry.mac.to_ascii_lowercase(),
            manufacturer: entry.manufacturer.clone(),
            model: entry.model.clone(),
            fw_version: entry.fw_version.clone(),
            api,
            coordinator,
        }
    }

    /// Create the device's coordinator and perform the first refresh
    ///
    /// Fails when the first refresh fails; the entry is not ready yet.
    pub async fn setup(
        entry: &EntryConfig,
        api: Arc<dyn DeviceApi>,
    ) -> Result<Self, CoordinatorError> {
        let coordinator = Arc::new(UpdateCoordinator::new(entry.name.clone(), api.clone()));
        coordinator.first_refresh().await?;

        info!(
            "[{}] Device ready: {} ({} at {})",
            entry.entry_id,
            entry.name,
            api.device_type(),
            api.host()
        );

        Ok(Self::new(entry, api, coordinator))
    }

    pub fn api(&self) -> &dyn DeviceApi {
        self.api.as_ref()
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// Device registry record for the engine
    pub fn device_info(&self) -> engine::Device {
        let mut device = engine::Device::new(self.unique_id.clone(), self.name.clone());
        device.identifiers = vec![
            (DOMAIN.to_string(), self.unique_id.clone()),
            ("mac".to_string(), self.mac_address.clone()),
        ];
        device.manufacturer = Some(self.manufacturer.clone());
        device.model = self
            .model
            .clone()
            .or_else(|| Some(self.api.device_type().to_string()));
        device.sw_version = self.fw_version.clone();
        device
    }
}
