#[cfg(feature = "integration_broadlink")]
pub mod broadlink;
