pub mod chat;
pub mod id;
pub mod member;
pub mod room;

pub use chat::ChatRecord;
pub use id::{InstanceId, RoomId, UserId};
pub use member::{PresenceRecord, Role};
pub use room::{InstanceAssignment, RoomRecord};
