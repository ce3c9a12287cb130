//! Shared polling coordinator for one Broadlink device.
//!
//! The coordinator holds the last fetched dataset and notifies listeners after
//! every fetch. It has no timer of its own: fetches happen on the first
//! refresh and whenever an entity asks for one.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::device::DeviceApi;
use super::device::DeviceError;
use super::device::SensorData;

/// What listeners observe after each fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorSnapshot {
    /// Whether the most recent fetch succeeded
    pub last_update_success: bool,

    /// Data from the most recent successful fetch
    pub data: SensorData,

    /// Number of successful fetches so far.
    ///
    /// A watch receiver only sees the latest snapshot, so a success followed
    /// by a failure can arrive as a single notification. A moved counter tells
    /// the listener that `data` is newer than what it last copied.
    pub successes: u64,
}

/// A registered listener; it is notified once per completed fetch.
///
/// Dropping the receiver removes the listener.
pub type Listener = watch::Receiver<CoordinatorSnapshot>;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("first refresh of {name} failed: {source}")]
    FirstRefresh {
        name: String,
        #[source]
        source: DeviceError,
    },
}

/// Read side of a polling coordinator, as consumed by entities
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Whether the last fetch succeeded
    fn last_update_success(&self) -> bool;

    /// Data from the last successful fetch
    fn data(&self) -> SensorData;

    /// Register a change listener
    fn add_listener(&self) -> Listener;

    /// Ask for a refresh. Concurrent requests are coalesced into one fetch.
    async fn request_refresh(&self);
}

/// Coordinator backed by a [`DeviceApi`]
pub struct UpdateCoordinator {
    name: String,
    api: Arc<dyn DeviceApi>,
    snapshot: watch::Sender<CoordinatorSnapshot>,

    /// Serializes fetches
    refresh_lock: Mutex<()>,

    /// Number of completed fetches, used to coalesce waiting requests
    completed: AtomicU64,

    /// Set while fetches are failing, so failure and recovery log once
    failing: AtomicBool,
}

impl UpdateCoordinator {
    pub fn new(name: String, api: Arc<dyn DeviceApi>) -> Self {
        let (snapshot, _) = watch::channel(CoordinatorSnapshot::default());
        Self {
            name,
            api,
            snapshot,
            refresh_lock: Mutex::new(()),
            completed: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Perform the initial fetch; an error means the device is not ready
    pub async fn first_refresh(&self) -> Result<(), CoordinatorError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch()
            .await
            .map_err(|source| CoordinatorError::FirstRefresh {
                name: self.name.clone(),
                source,
            })
    }

    /// Fetch from the device and publish the result. Caller holds `refresh_lock`.
    async fn fetch(&self) -> Result<(), DeviceError> {
        debug!("[{}] Fetching sensor data", self.name);
        let result = self.api.check_sensors().await;

        let outcome = match result {
            Ok(data) => {
                if self.failing.swap(false, Ordering::AcqRel) {
                    info!("[{}] Fetching data recovered", self.name);
                }
                self.snapshot.send_modify(|snapshot| {
                    snapshot.last_update_success = true;
                    snapshot.data = data;
                    snapshot.successes += 1;
                });
                Ok(())
            }
            Err(e) => {
                if !self.failing.swap(true, Ordering::AcqRel) {
                    warn!("[{}] Error fetching data: {}", self.name, e);
                } else {
                    debug!("[{}] Error fetching data: {}", self.name, e);
                }
                // Keep the last good data
                self.snapshot.send_modify(|snapshot| {
                    snapshot.last_update_success = false;
                });
                Err(e)
            }
        };

        self.completed.fetch_add(1, Ordering::AcqRel);
        outcome
    }
}

#[async_trait]
impl Coordinator for UpdateCoordinator {
    fn last_update_success(&self) -> bool {
        self.snapshot.borrow().last_update_success
    }

    fn data(&self) -> SensorData {
        self.snapshot.borrow().data.clone()
    }

    fn add_listener(&self) -> Listener {
        self.snapshot.subscribe()
    }

    async fn request_refresh(&self) {
        let seen = self.completed.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        // A fetch finished while we waited for the lock; its result is fresh
        // enough for this request too.
        if self.completed.load(Ordering::Acquire) != seen {
            debug!("[{}] Refresh coalesced with a concurrent request", self.name);
            return;
        }

        // Failures are reflected in the snapshot
        let _ = self.fetch().await;
    }
}
