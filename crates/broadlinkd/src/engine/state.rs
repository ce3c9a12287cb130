use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// State of a numeric sensor entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorState {
    /// Last known reading, `None` while unknown.
    pub value: Option<f64>,

    /// Human-readable name shown alongside the reading.
    pub friendly_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub sensors: HashMap<String, SensorState>,
}
