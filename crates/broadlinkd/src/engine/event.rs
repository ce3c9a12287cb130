use super::state::SensorState;

/// Engine-level events broadcast to subscribers.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary.
#[derive(Debug, Clone)]
pub enum Event {
    SensorStateChanged {
        entity_id: String,
        state: SensorState,
    },
    EntityRemoved {
        entity_id: String,
    },
}
