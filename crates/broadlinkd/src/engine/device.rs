use serde::Serialize;

/// A device in the broadlinkd system.
///
/// A device represents a physical or logical device that contains one or more entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            identifiers: Vec::new(),
            name,
            manufacturer: None,
            model: None,
            sw_version: None,
            entity_ids: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
        }
    }

    pub fn remove_entity(&mut self, entity_id: &str) {
        self.entity_ids.retain(|id| id != entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_entity_is_idempotent() {
        let mut device = Device::new("aa:bb".to_string(), "Hub".to_string());
        device.add_entity("sensor.hub_temperature".to_string());
        device.add_entity("sensor.hub_temperature".to_string());
        assert_eq!(device.entity_ids, vec!["sensor.hub_temperature"]);

        device.remove_entity("sensor.hub_temperature");
        assert!(device.entity_ids.is_empty());
    }
}
