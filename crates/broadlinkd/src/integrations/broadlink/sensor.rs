//! Broadlink sensor platform.
//!
//! Maps the readings of a device's coordinator onto sensor entities. The
//! table below is the only source of display metadata; everything else is
//! listener wiring.

use std::future::Future;
use std::sync::Arc;

use strum::AsRefStr;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use super::config::LegacySensorConfig;
use super::coordinator::Coordinator;
use super::coordinator::CoordinatorSnapshot;
use super::device::BroadlinkDevice;
use super::device::A1_DEVICE_TYPE;
use super::entries::import_device;
use super::entries::ConfigEntries;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::SensorState;

pub const TEMP_CELSIUS: &str = "°C";
pub const PERCENTAGE: &str = "%";

/// A physical quantity reported by a Broadlink device
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum MonitoredCondition {
    Temperature,
    AirQuality,
    Humidity,
    Light,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SensorDeviceClass {
    Temperature,
    Humidity,
    Illuminance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SensorStateClass {
    Measurement,
}

/// Display metadata for an individual sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorMetadata {
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<SensorDeviceClass>,
    pub state_class: Option<SensorStateClass>,
}

impl SensorMetadata {
    const fn named(name: &'static str) -> Self {
        Self {
            name,
            unit: None,
            device_class: None,
            state_class: None,
        }
    }
}

static TEMPERATURE: SensorMetadata = SensorMetadata {
    name: "Temperature",
    unit: Some(TEMP_CELSIUS),
    device_class: Some(SensorDeviceClass::Temperature),
    state_class: Some(SensorStateClass::Measurement),
};

static AIR_QUALITY: SensorMetadata = SensorMetadata::named("Air Quality");

static HUMIDITY: SensorMetadata = SensorMetadata {
    name: "Humidity",
    unit: Some(PERCENTAGE),
    device_class: Some(SensorDeviceClass::Humidity),
    state_class: Some(SensorStateClass::Measurement),
};

static LIGHT: SensorMetadata = SensorMetadata {
    device_class: Some(SensorDeviceClass::Illuminance),
    ..SensorMetadata::named("Light")
};

static NOISE: SensorMetadata = SensorMetadata::named("Noise");

impl MonitoredCondition {
    pub fn metadata(self) -> &'static SensorMetadata {
        match self {
            MonitoredCondition::Temperature => &TEMPERATURE,
            MonitoredCondition::AirQuality => &AIR_QUALITY,
            MonitoredCondition::Humidity => &HUMIDITY,
            MonitoredCondition::Light => &LIGHT,
            MonitoredCondition::Noise => &NOISE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unsupported monitored condition: {0}")]
    UnknownCondition(String),
}

/// Resolve a condition key reported by a device
pub fn lookup(key: &str) -> Result<MonitoredCondition, SetupError> {
    key.parse()
        .map_err(|_| SetupError::UnknownCondition(key.to_string()))
}

/// Representation of a Broadlink sensor
pub struct BroadlinkSensor {
    entity_id: String,
    name: String,
    unique_id: String,
    device_id: String,
    condition: MonitoredCondition,
    coordinator: Arc<dyn Coordinator>,
    state: Option<f64>,

    /// Coordinator success count as of the last copied reading
    seen_successes: u64,
}

impl BroadlinkSensor {
    pub fn new(device: &BroadlinkDevice, condition: MonitoredCondition) -> Self {
        let coordinator = device.coordinator().clone();
        let name = format!("{} {}", device.name, condition.metadata().name);
        let state = coordinator.data().get(condition.as_ref()).copied();

        Self {
            entity_id: default_entity_id(&name),
            name,
            unique_id: format!("{}-{}", device.unique_id, condition),
            device_id: device.unique_id.clone(),
            condition,
            coordinator,
            state,
            seen_successes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn condition(&self) -> MonitoredCondition {
        self.condition
    }

    pub fn metadata(&self) -> &'static SensorMetadata {
        self.condition.metadata()
    }

    /// Cached last known reading
    pub fn native_value(&self) -> Option<f64> {
        self.state
    }

    /// Replace the generated entity ID (used to resolve collisions)
    pub fn set_entity_id(&mut self, entity_id: String) {
        self.entity_id = entity_id;
    }

    /// State as written to the engine
    pub fn sensor_state(&self) -> SensorState {
        let metadata = self.metadata();
        SensorState {
            value: self.state,
            friendly_name: self.name.clone(),
            unit_of_measurement: metadata.unit.map(String::from),
            device_class: metadata.device_class.map(|c| c.to_string()),
            state_class: metadata.state_class.map(|c| c.to_string()),
        }
    }

    /// Apply a coordinator notification and return the state to write.
    ///
    /// After a failed fetch the previous reading is kept, unless a successful
    /// fetch this sensor has not seen yet was merged into the same notification.
    pub fn handle_coordinator_update(&mut self, snapshot: &CoordinatorSnapshot) -> SensorState {
        if snapshot.last_update_success || snapshot.successes != self.seen_successes {
            self.state = snapshot.data.get(self.condition.as_ref()).copied();
            self.seen_successes = snapshot.successes;
        } else {
            debug!("{}: last fetch failed, keeping {:?}", self.entity_id, self.state);
        }
        self.sensor_state()
    }

    /// Ask the coordinator to refresh.
    ///
    /// The returned future does not borrow the sensor, so it can be spawned
    /// and overlap with requests from sibling sensors.
    pub fn update(&self) -> impl Future<Output = ()> + Send + 'static {
        let coordinator = self.coordinator.clone();
        async move { coordinator.request_refresh().await }
    }

    /// Register the sensor's coordinator listener.
    ///
    /// Every notification updates the sensor and writes its state to the
    /// engine. The listener is released when the returned registration drops.
    pub async fn added_to_host(
        sensor: Arc<Mutex<BroadlinkSensor>>,
        to_engine: FromIntegrationSender,
    ) -> ListenerRegistration {
        let mut listener = sensor.lock().await.coordinator.add_listener();

        let task = tokio::spawn(async move {
            while listener.changed().await.is_ok() {
                let snapshot = listener.borrow_and_update().clone();
                let (entity_id, state) = {
                    let mut sensor = sensor.lock().await;
                    let state = sensor.handle_coordinator_update(&snapshot);
                    (sensor.entity_id.clone(), state)
                };

                let msg = FromIntegrationMessage::SensorStateChanged { entity_id, state };
                if let Err(e) = to_engine.send(msg).await {
                    warn!("Failed to send SensorStateChanged message: {}", e);
                    break;
                }
            }
        });

        ListenerRegistration(task)
    }
}

impl Entity for BroadlinkSensor {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn state_json(&self) -> serde_json::Value {
        serde_json::json!({
            "entity_id": self.entity_id,
            "unique_id": self.unique_id,
            "device_id": self.device_id,
            "platform": "sensor",
            "state": self.sensor_state(),
        })
    }

    fn platform(&self) -> &'static str {
        "sensor"
    }
}

/// Keeps a sensor subscribed to its coordinator; dropping it unsubscribes
#[derive(Debug)]
pub struct ListenerRegistration(JoinHandle<()>);

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `sensor.<slug of name>` with underscores as separators
fn default_entity_id(name: &str) -> String {
    format!("sensor.{}", slug::slugify(name).replace('-', "_"))
}

/// Set up the sensors of a configuration entry.
///
/// Conditions reading zero are skipped unless the device is an A1, which
/// reports every sensor.
pub fn setup_entry(
    device: &BroadlinkDevice,
    add_entities: impl FnOnce(Vec<BroadlinkSensor>),
) -> Result<(), SetupError> {
    let sensor_data = device.coordinator().data();
    let all_sensors = device.api().device_type() == A1_DEVICE_TYPE;

    let sensors = sensor_data
        .iter()
        .filter(|(_, value)| **value != 0.0 || all_sensors)
        .map(|(key, _)| lookup(key).map(|condition| BroadlinkSensor::new(device, condition)))
        .collect::<Result<Vec<_>, _>>()?;

    add_entities(sensors);
    Ok(())
}

/// Import the device and discontinue the platform.
///
/// Legacy `sensor` platform blocks are converted into import flows; no
/// entities are ever added from here.
pub fn setup_platform(config: &LegacySensorConfig, entries: &ConfigEntries) {
    import_device(entries, &config.host);
    warn!("The sensor platform is deprecated, please remove it from your configuration");
}
