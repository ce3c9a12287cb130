use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::State;
use crate::engine::IntegrationContext;

/// broadlinkd engine
///
/// This structure handles the flow of events, sending commands to the correct
/// integration, and maintaining a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Devices reported by integrations, keyed by device id
    devices: std::sync::Mutex<HashMap<String, Device>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Fan-out of state changes to subscribers
    events: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity of the event broadcast; slow subscribers observe `Lagged`
const EVENT_CHANNEL_SIZE: usize = 256;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            devices: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every factory in the integration registry and registers the ones
    /// that are enabled by the config.
    pub fn register_integrations_from_config(&self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.insert(name.clone(), to_integration_tx);
        }

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        if let Ok(mut handles) = self.integration_handles.lock() {
            handles.push(handle);
        }
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        let entity_id = msg.entity_id().to_string();

        // Route to the integration that owns this entity
        let integration_name = {
            let map = self
                .entity_integration_map
                .lock()
                .map_err(|e| -> Box<dyn Error + Send> {
                    Box::new(std::io::Error::other(e.to_string()))
                })?;

            map.get(&entity_id)
                .cloned()
                .ok_or_else(|| -> Box<dyn Error + Send> {
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("No integration found for entity: {}", entity_id),
                    ))
                })?
        };

        let channels = self
            .integration_channels
            .lock()
            .map_err(|e| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::other(e.to_string()))
            })?;

        let tx = channels.get(&integration_name).ok_or_else(
            || -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Integration channel not found: {}", integration_name),
                ))
            },
        )?;

        tx.send(msg)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    /// Ask the entity's integration to refresh its data
    pub fn request_update(&self, entity_id: String) -> Result<(), Box<dyn Error + Send>> {
        self.send_command(ToIntegrationMessage::UpdateEntity { entity_id })
    }

    /// Issue an update request to every known entity.
    ///
    /// Failures are logged per entity so one stale route does not starve the rest.
    pub fn request_update_all(&self) {
        for entity_id in self.entity_ids() {
            debug!("Requesting update for {}", entity_id);
            if let Err(e) = self.request_update(entity_id.clone()) {
                warn!("Failed to request update for {}: {}", entity_id, e);
            }
        }
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle_event(msg).await {
                warn!("Error handling event: {}", e);
            }
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Close every integration channel and wait for the integration tasks to
    /// run their shutdown hooks.
    pub async fn shutdown(&self) {
        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles: Vec<JoinHandle<()>> = match self.integration_handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Integration task ended abnormally: {}", e);
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// IDs of every entity an integration has registered
    pub fn entity_ids(&self) -> Vec<String> {
        match self.entity_integration_map.lock() {
            Ok(map) => {
                let mut ids: Vec<String> = map.keys().cloned().collect();
                ids.sort();
                ids
            }
            Err(_) => Vec::new(),
        }
    }

    /// Look up a registered device
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(device_id).cloned())
    }

    /// Handle an event from an integration
    async fn handle_event(&self, msg: FromIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            FromIntegrationMessage::DeviceDiscovered {
                device,
                integration_name,
            } => {
                info!(
                    "Device discovered: {} ({}) from {}",
                    device.name, device.id, integration_name
                );
                if let Ok(mut devices) = self.devices.lock() {
                    // Keep entity links from an earlier registration of the same device
                    let entity_ids = devices
                        .get(&device.id)
                        .map(|d| d.entity_ids.clone())
                        .unwrap_or_default();
                    let mut device = device;
                    for entity_id in entity_ids {
                        device.add_entity(entity_id);
                    }
                    devices.insert(device.id.clone(), device);
                }
            }
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
                device_id,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                if let Some(device_id) = device_id {
                    if let Ok(mut devices) = self.devices.lock() {
                        match devices.get_mut(&device_id) {
                            Some(device) => device.add_entity(entity_id.clone()),
                            None => warn!(
                                "Entity {} references unknown device {}",
                                entity_id, device_id
                            ),
                        }
                    }
                }

                // Record which integration owns this entity for command routing.
                // State is not populated until the first state-change message arrives.
                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.insert(entity_id, integration_name);
                }
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.sensors.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                if let Ok(mut map) = self.entity_integration_map.lock() {
                    map.remove(&entity_id);
                }

                if let Ok(mut devices) = self.devices.lock() {
                    for device in devices.values_mut() {
                        device.remove_entity(&entity_id);
                    }
                }

                // No subscribers is not an error
                let _ = self.events.send(Event::EntityRemoved { entity_id });
            }
            FromIntegrationMessage::SensorStateChanged { entity_id, state } => {
                debug!("Sensor state changed: {} -> {:?}", entity_id, state.value);

                {
                    let mut snapshot = State::clone(&self.state.load());
                    snapshot.sensors.insert(entity_id.clone(), state.clone());
                    self.state.store(Arc::new(snapshot));
                }

                let _ = self
                    .events
                    .send(Event::SensorStateChanged { entity_id, state });
            }
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::SensorState;

    /// Integration that registers one sensor and records the commands it receives
    struct RecordingIntegration {
        received: Arc<std::sync::Mutex<Vec<ToIntegrationMessage>>>,
    }

    #[async_trait]
    impl Integration for RecordingIntegration {
        fn name(&self) -> &str {
            "recording"
        }

        async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
            let mut device = Device::new("34:ea:34:00:00:01".to_string(), "Hub".to_string());
            device.manufacturer = Some("Broadlink".to_string());
            let msgs = vec![
                FromIntegrationMessage::DeviceDiscovered {
                    device,
                    integration_name: "recording".to_string(),
                },
                FromIntegrationMessage::EntityDiscovered {
                    entity_id: "sensor.hub_temperature".to_string(),
                    integration_name: "recording".to_string(),
                    device_id: Some("34:ea:34:00:00:01".to_string()),
                },
                FromIntegrationMessage::SensorStateChanged {
                    entity_id: "sensor.hub_temperature".to_string(),
                    state: SensorState {
                        value: Some(21.5),
                        friendly_name: "Hub Temperature".to_string(),
                        unit_of_measurement: Some("°C".to_string()),
                        device_class: Some("temperature".to_string()),
                        state_class: Some("measurement".to_string()),
                    },
                },
            ];
            for msg in msgs {
                tx.send(msg)
                    .await
                    .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
            }
            Ok(())
        }

        async fn handle_message(
            &mut self,
            msg: ToIntegrationMessage,
        ) -> Result<(), Box<dyn Error + Send>> {
            self.received.lock().unwrap().push(msg);
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_state_and_routing() {
        let engine = Arc::new(Engine::new());
        let mut events = engine.subscribe();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        engine.register_integration(
            "recording".to_string(),
            Box::new(RecordingIntegration {
                received: received.clone(),
            }),
        );

        let runner = engine.clone();
        let run_task = tokio::spawn(async move {
            let _ = runner.run().await;
        });

        wait_for(|| engine.state_snapshot().sensors.contains_key("sensor.hub_temperature")).await;

        let state = engine.state_snapshot();
        assert_eq!(state.sensors["sensor.hub_temperature"].value, Some(21.5));
        assert_eq!(engine.entity_ids(), vec!["sensor.hub_temperature"]);

        let device = engine.device("34:ea:34:00:00:01").unwrap();
        assert_eq!(device.entity_ids, vec!["sensor.hub_temperature"]);

        match events.recv().await.unwrap() {
            Event::SensorStateChanged { entity_id, state } => {
                assert_eq!(entity_id, "sensor.hub_temperature");
                assert_eq!(state.friendly_name, "Hub Temperature");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        engine
            .request_update("sensor.hub_temperature".to_string())
            .unwrap();
        wait_for(|| !received.lock().unwrap().is_empty()).await;
        assert_eq!(
            received.lock().unwrap()[0],
            ToIntegrationMessage::UpdateEntity {
                entity_id: "sensor.hub_temperature".to_string()
            }
        );

        engine.shutdown().await;
        run_task.abort();
    }

    #[tokio::test]
    async fn test_send_command_unknown_entity() {
        let engine = Engine::new();
        let result = engine.request_update("sensor.missing".to_string());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_entity_removed_clears_state() {
        let engine = Engine::new();
        engine
            .handle_event(FromIntegrationMessage::EntityDiscovered {
                entity_id: "sensor.hub_noise".to_string(),
                integration_name: "broadlink".to_string(),
                device_id: None,
            })
            .await
            .unwrap();
        engine
            .handle_event(FromIntegrationMessage::SensorStateChanged {
                entity_id: "sensor.hub_noise".to_string(),
                state: SensorState {
                    value: Some(1.0),
                    friendly_name: "Hub Noise".to_string(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert!(engine.state_snapshot().sensors.contains_key("sensor.hub_noise"));

        engine
            .handle_event(FromIntegrationMessage::EntityRemoved {
                entity_id: "sensor.hub_noise".to_string(),
            })
            .await
            .unwrap();
        assert!(engine.state_snapshot().sensors.is_empty());
        assert!(engine.entity_ids().is_empty());
    }
}
