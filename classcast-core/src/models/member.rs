use serde::{Deserialize, Serialize};

use super::id::{InstanceId, UserId};

/// Role of a connected user within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub const fn is_teacher(self) -> bool {
        matches!(self, Self::Teacher)
    }

    #[must_use]
    pub const fn from_is_teacher(is_teacher: bool) -> Self {
        if is_teacher {
            Self::Teacher
        } else {
            Self::Student
        }
    }
}

/// Presence entry stored per user in the room's distributed member hash.
///
/// `instance_id` records which process hosts the user's connection so that
/// any instance can tell where a room's members actually live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub instance_id: InstanceId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert!(Role::from_is_teacher(true).is_teacher());
        assert!(!Role::from_is_teacher(false).is_teacher());
    }

    #[test]
    fn test_presence_serialization() {
        let record = PresenceRecord {
            user_id: UserId::from("u1"),
            name: "Alice".to_string(),
            role: Role::Teacher,
            instance_id: InstanceId::from("i-123"),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"role\":\"teacher\""));
        assert!(json.contains("\"userId\":\"u1\""));
        let back: PresenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
