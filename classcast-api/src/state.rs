//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use classcast_core::config::Config;
use classcast_core::models::InstanceId;
use classcast_core::store::RoomStore;
use classcast_fleet::FleetCoordinator;
use classcast_sfu::SfuManager;

use crate::hub::RoomHub;

/// Everything a handler needs, constructed once at startup and passed
/// explicitly; there are no process-wide globals.
#[derive(Clone)]
pub struct AppState {
    /// Identity of this process, stored with every presence record.
    pub instance_id: InstanceId,
    pub config: Arc<Config>,
    pub store: Arc<dyn RoomStore>,
    pub sfu: Arc<SfuManager>,
    /// Absent on deployments that never provision (e.g. the per-room
    /// instances themselves); room creation then points at this instance.
    pub fleet: Option<Arc<FleetCoordinator>>,
    pub hub: RoomHub,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        instance_id: InstanceId,
        config: Arc<Config>,
        store: Arc<dyn RoomStore>,
        sfu: Arc<SfuManager>,
        fleet: Option<Arc<FleetCoordinator>>,
    ) -> Self {
        Self {
            instance_id,
            config,
            store,
            sfu,
            fleet,
            hub: RoomHub::new(),
            started_at: Instant::now(),
        }
    }
}
