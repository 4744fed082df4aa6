use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::UserId;

/// A single chat entry as stored in the room's bounded history list and
/// replayed to late joiners. Timestamps travel as epoch milliseconds on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub user_id: UserId,
    pub name: String,
    pub is_teacher: bool,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_epoch_millis() {
        let record = ChatRecord {
            user_id: UserId::from("u1"),
            name: "Alice".to_string(),
            is_teacher: false,
            message: "hi".to_string(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(json["isTeacher"], false);
    }
}
