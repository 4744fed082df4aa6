//! Cloud fleet provider seam.
//!
//! The coordinator consumes exactly these operations; provider semantics
//! beyond them (regions, billing, image management) stay outside this
//! crate. The binary wires a concrete implementation chosen at
//! deployment.

use async_trait::async_trait;

use classcast_core::models::{InstanceId, RoomId};

use crate::error::FleetError;

/// Everything a provider needs to launch a room's dedicated instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Prebuilt image the instance boots from.
    pub image_id: String,
    pub instance_type: String,
    /// Room the instance is dedicated to; providers tag the instance with
    /// it so operators can map instances back to rooms.
    pub room_id: RoomId,
    /// Script run on first boot to (re)start the room application shipped
    /// with the image.
    pub boot_script: String,
    pub subnet_id: Option<String>,
    pub security_group: Option<String>,
}

/// Provider-reported run state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
    Unknown,
}

/// Operations consumed from the cloud fleet provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Request a new instance; returns its id as soon as the provider
    /// assigns one, before the instance is running.
    async fn create_instance(&self, spec: &LaunchSpec) -> Result<InstanceId, FleetError>;

    async fn instance_state(&self, instance_id: &InstanceId) -> Result<InstanceState, FleetError>;

    /// Block until the provider reports the instance running.
    async fn wait_until_running(&self, instance_id: &InstanceId) -> Result<(), FleetError>;

    /// Externally reachable address of a running instance.
    async fn public_address(&self, instance_id: &InstanceId) -> Result<String, FleetError>;

    async fn terminate_instance(&self, instance_id: &InstanceId) -> Result<(), FleetError>;
}
