/// Entity abstraction for broadlinkd
///
/// All entities exposed to the engine implement the Entity trait.
///
/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Entity ID (e.g. "sensor.living_room_temperature")
    fn entity_id(&self) -> &str;

    /// Serialize current state to JSON for Engine storage
    fn state_json(&self) -> serde_json::Value;

    /// Return the platform type of this entity (e.g. "sensor")
    fn platform(&self) -> &'static str;
}
