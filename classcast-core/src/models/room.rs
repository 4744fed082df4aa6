use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{InstanceId, RoomId};

/// Authoritative room record held in the distributed store.
///
/// The instance fields double as the room's fleet state: both absent means
/// no dedicated instance, id without address means a launch is under way,
/// both present means the instance reached "running" at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: RoomId,
    pub teacher_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub instance_id: Option<InstanceId>,
    pub public_address: Option<String>,
}

impl RoomRecord {
    #[must_use]
    pub fn new(id: RoomId, teacher_name: impl Into<String>) -> Self {
        Self {
            id,
            teacher_name: teacher_name.into(),
            created_at: Utc::now(),
            instance_id: None,
            public_address: None,
        }
    }
}

/// A room's dedicated instance once both id and address are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAssignment {
    pub instance_id: InstanceId,
    pub public_address: String,
}
