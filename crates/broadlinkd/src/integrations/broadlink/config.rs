use std::collections::BTreeMap;

use serde::Deserialize;

fn default_true() -> bool {
    true
}

fn default_manufacturer() -> String {
    "Broadlink".to_string()
}

/// Configuration for the Broadlink integration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Enable the integration (default: true when section is present)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Configured devices, one configuration entry each
    #[serde(default)]
    pub entries: Vec<EntryConfig>,

    /// Legacy `sensor` platform blocks, imported into entries on startup
    #[serde(default)]
    pub sensor: Vec<LegacySensorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            entries: Vec::new(),
            sensor: Vec::new(),
        }
    }
}

/// A configuration entry for one Broadlink device
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntryConfig {
    pub entry_id: String,

    /// Hostname or IP address of the hub
    pub host: String,

    /// MAC address, e.g. "34:ea:34:b4:3c:01"
    pub mac: String,

    /// Device name used as prefix for entity names
    pub name: String,

    /// Device type as reported by the hub (e.g. "A1", "RM4PRO")
    #[serde(rename = "type")]
    pub device_type: String,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub fw_version: Option<String>,

    /// Readings reported by the simulated backend, keyed by monitored condition
    #[serde(default)]
    pub readings: BTreeMap<String, f64>,
}

/// Legacy `sensor` platform configuration
///
/// Only `host` is required; other keys from old configurations (name,
/// monitored_conditions, update_interval, ...) are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacySensorConfig {
    pub host: String,

    #[serde(flatten)]
    pub extra: toml::Table,
}
