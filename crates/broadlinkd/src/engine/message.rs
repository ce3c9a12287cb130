//! Type-safe message system for broadlinkd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use super::device::Device;
use super::state::SensorState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// A device was registered; its entities follow as `EntityDiscovered`
    DeviceDiscovered {
        device: Device,
        integration_name: String,
    },

    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
        device_id: Option<String>,
    },

    /// An entity was removed (config entry unloaded, etc.)
    EntityRemoved { entity_id: String },

    /// A sensor's state should be persisted and broadcast
    SensorStateChanged {
        entity_id: String,
        state: SensorState,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToIntegrationMessage {
    /// Ask the entity to refresh its data
    UpdateEntity { entity_id: String },
}

impl ToIntegrationMessage {
    /// Entity this command is addressed to, used for routing.
    pub fn entity_id(&self) -> &str {
        match self {
            ToIntegrationMessage::UpdateEntity { entity_id } => entity_id,
        }
    }
}
