use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;
use tracing::info;

use super::config::EntryConfig;

/// How an entry or flow came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSource {
    /// Converted from legacy file-based platform configuration
    Import,
}

/// A configuration flow started for a device that has no entry yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFlow {
    pub host: String,
    pub source: FlowSource,
}

/// Configuration entries of the integration plus flows waiting to become entries
#[derive(Debug, Default)]
pub struct ConfigEntries {
    entries: Vec<EntryConfig>,
    flows: Mutex<Vec<ConfigFlow>>,
}

impl ConfigEntries {
    pub fn new(entries: Vec<EntryConfig>) -> Self {
        Self {
            entries,
            flows: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> &[EntryConfig] {
        &self.entries
    }

    /// Hosts that already have a configuration entry
    pub fn configured_hosts(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.host.as_str()).collect()
    }

    /// Start an import flow for `host`.
    ///
    /// A second flow for a host with one in progress is dropped.
    pub fn start_import_flow(&self, host: &str) {
        let Ok(mut flows) = self.flows.lock() else {
            return;
        };

        if flows.iter().any(|f| f.host == host) {
            debug!("Import flow for {} already in progress", host);
            return;
        }

        info!("Starting import flow for {}", host);
        flows.push(ConfigFlow {
            host: host.to_string(),
            source: FlowSource::Import,
        });
    }

    /// Flows that have not been turned into entries
    pub fn pending_flows(&self) -> Vec<ConfigFlow> {
        self.flows
            .lock()
            .map(|flows| flows.clone())
            .unwrap_or_default()
    }
}

/// Create a config flow for a device, unless an entry already covers its host
pub fn import_device(entries: &ConfigEntries, host: &str) {
    if entries.configured_hosts().contains(host) {
        debug!("Device at {} is already configured", host);
        return;
    }
    entries.start_import_flow(host);
}
