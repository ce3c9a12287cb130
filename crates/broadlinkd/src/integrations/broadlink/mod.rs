//! Broadlink integration.
//!
//! Configuration entries become devices with an update coordinator each; the
//! sensor platform turns coordinator data into sensor entities.

// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod broadlink;
mod config;
pub mod coordinator;
pub mod device;
pub mod entries;
pub mod sensor;

pub use broadlink::BroadlinkIntegration;
pub use config::Config as BroadlinkConfig;
use linkme::distributed_slice;
use tracing::info;

use crate::engine;

pub const DOMAIN: &str = "broadlink";

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_broadlink(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let broadlink_config = if let Some(c) = &ctx.config.integrations.broadlink {
        c
    } else {
        return Ok(None);
    };

    if !broadlink_config.enabled {
        return Ok(None);
    }

    info!(
        "Initializing Broadlink integration ({} entries)",
        broadlink_config.entries.len()
    );
    Ok(Some(Box::new(BroadlinkIntegration::new(
        device::SimulatedConnector,
        broadlink_config,
    ))))
}
