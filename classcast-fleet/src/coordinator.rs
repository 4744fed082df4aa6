//! Per-room instance lifecycle coordination.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use classcast_core::config::FleetConfig;
use classcast_core::models::{InstanceAssignment, RoomId};
use classcast_core::store::RoomStore;

use crate::error::FleetError;
use crate::provider::{CloudProvider, InstanceState, LaunchSpec};
use crate::singleflight::{SingleFlight, SingleFlightError};

/// Boot script run on a fresh instance: the image ships the application,
/// the script only (re)starts it.
const BOOT_SCRIPT: &str = "#!/bin/bash\nsystemctl restart classcast-room || systemctl start classcast-room\n";

/// Coordinates dedicated compute instances, one per room.
///
/// Launches are single-flight per room id: concurrent `acquire` calls
/// share one provider call and one result, and the in-flight entry clears
/// on completion or failure.
pub struct FleetCoordinator {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn RoomStore>,
    config: FleetConfig,
    launches: SingleFlight<RoomId, InstanceAssignment, FleetError>,
}

impl FleetCoordinator {
    pub fn new(provider: Arc<dyn CloudProvider>, store: Arc<dyn RoomStore>, config: FleetConfig) -> Self {
        Self {
            provider,
            store,
            config,
            launches: SingleFlight::new(),
        }
    }

    /// Get the room's dedicated instance, launching one if needed.
    ///
    /// A verified running instance is returned immediately. Otherwise the
    /// caller joins the room's in-flight launch, or starts one. Provider
    /// failures reject every waiter; there is no internal retry.
    pub async fn acquire(
        &self,
        room_id: &RoomId,
        teacher_name: &str,
    ) -> Result<InstanceAssignment, FleetError> {
        if let Some(existing) = self.verify(room_id).await {
            debug!(
                room_id = %room_id,
                instance_id = %existing.instance_id,
                "Instance already running for room"
            );
            return Ok(existing);
        }

        let result = self
            .launches
            .do_work(room_id.clone(), self.launch(room_id, teacher_name))
            .await;

        result.map_err(|err| match err {
            SingleFlightError::Inner(inner) => inner,
            SingleFlightError::WorkerFailed => FleetError::LaunchAborted(room_id.to_string()),
        })
    }

    async fn launch(
        &self,
        room_id: &RoomId,
        teacher_name: &str,
    ) -> Result<InstanceAssignment, FleetError> {
        info!(
            room_id = %room_id,
            teacher_name = %teacher_name,
            image_id = %self.config.image_id,
            "Launching dedicated instance for room"
        );

        let spec = LaunchSpec {
            image_id: self.config.image_id.clone(),
            instance_type: self.config.instance_type.clone(),
            room_id: room_id.clone(),
            boot_script: BOOT_SCRIPT.to_string(),
            subnet_id: self.config.subnet_id.clone(),
            security_group: self.config.security_group.clone(),
        };

        let instance_id = self.provider.create_instance(&spec).await?;

        // Persisted before waiting so a crash mid-launch leaves the id
        // visible for verification and reclamation.
        self.store
            .set_instance_id(room_id, &instance_id)
            .await
            .map_err(|err| FleetError::Store(err.to_string()))?;

        debug!(room_id = %room_id, instance_id = %instance_id, "Waiting for instance to run");
        match timeout(
            Duration::from_secs(self.config.launch_timeout_seconds),
            self.provider.wait_until_running(&instance_id),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(FleetError::LaunchTimeout(instance_id.to_string())),
        }

        let public_address = self.provider.public_address(&instance_id).await?;
        self.store
            .set_public_address(room_id, &public_address)
            .await
            .map_err(|err| FleetError::Store(err.to_string()))?;

        info!(
            room_id = %room_id,
            instance_id = %instance_id,
            public_address = %public_address,
            "Instance running, waiting for application boot"
        );
        tokio::time::sleep(Duration::from_secs(self.config.settle_delay_seconds)).await;

        Ok(InstanceAssignment {
            instance_id,
            public_address,
        })
    }

    /// Check the room's stored instance against the provider.
    ///
    /// Returns the assignment only when the provider reports it running.
    /// A stored instance the provider says is gone is purged from the
    /// store. Store or provider failures degrade to absence so callers
    /// simply re-provision.
    pub async fn verify(&self, room_id: &RoomId) -> Option<InstanceAssignment> {
        let assignment = match self.store.instance_assignment(room_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return None,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "Store error verifying instance, treating as absent");
                return None;
            }
        };

        match self.provider.instance_state(&assignment.instance_id).await {
            Ok(InstanceState::Running) => Some(assignment),
            Ok(state) => {
                warn!(
                    room_id = %room_id,
                    instance_id = %assignment.instance_id,
                    ?state,
                    "Stored instance is not running, purging"
                );
                if let Err(err) = self.store.clear_instance(room_id).await {
                    warn!(room_id = %room_id, error = %err, "Failed to purge stale instance fields");
                }
                None
            }
            Err(err) => {
                warn!(
                    room_id = %room_id,
                    instance_id = %assignment.instance_id,
                    error = %err,
                    "Provider error verifying instance, treating as absent"
                );
                None
            }
        }
    }

    /// Terminate the room's instance and clear its store fields. Returns
    /// whether an instance was actually terminated.
    pub async fn release(&self, room_id: &RoomId) -> bool {
        let Some(assignment) = self.verify(room_id).await else {
            return false;
        };

        match self.provider.terminate_instance(&assignment.instance_id).await {
            Ok(()) => {
                if let Err(err) = self.store.clear_instance(room_id).await {
                    warn!(room_id = %room_id, error = %err, "Failed to clear released instance fields");
                }
                info!(
                    room_id = %room_id,
                    instance_id = %assignment.instance_id,
                    "Terminated instance for room"
                );
                true
            }
            Err(err) => {
                error!(
                    room_id = %room_id,
                    instance_id = %assignment.instance_id,
                    error = %err,
                    "Failed to terminate instance"
                );
                false
            }
        }
    }

    /// Release every room whose present-user set is empty and drop its
    /// store keys. Invoked externally (operator or an outside scheduler);
    /// the coordinator never schedules itself. Returns the number of rooms
    /// reclaimed.
    pub async fn reclaim_idle(&self) -> usize {
        let room_ids = match self.store.room_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                error!(error = %err, "Failed to enumerate rooms for reclamation");
                return 0;
            }
        };

        let mut reclaimed = 0;
        for room_id in room_ids {
            let members = match self.store.member_count(&room_id).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(room_id = %room_id, error = %err, "Skipping room in reclamation sweep");
                    continue;
                }
            };
            if members > 0 {
                continue;
            }

            info!(room_id = %room_id, "Room is empty, reclaiming");
            self.release(&room_id).await;
            if let Err(err) = self.store.delete_room(&room_id).await {
                warn!(room_id = %room_id, error = %err, "Failed to delete reclaimed room record");
            }
            reclaimed += 1;
        }

        if reclaimed > 0 {
            info!(reclaimed, "Idle reclamation pass complete");
        }
        reclaimed
    }
}
