//! Distributed room store abstraction.
//!
//! The store is the authoritative record of rooms across instances: the
//! room hash (teacher, creation time, hosting instance, public address,
//! router capabilities), the per-room presence hash, and the bounded chat
//! history list. Redis backs it in production; the in-memory
//! implementation backs tests and single-instance development.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChatRecord, InstanceAssignment, InstanceId, PresenceRecord, RoomId, RoomRecord, UserId};

/// Authoritative distributed room state.
///
/// Implementations must make membership and chat writes visible to a
/// subsequent read from the same caller; cross-instance reads may lag
/// concurrent writes from other instances.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create the room record if no record exists yet. Returns `false`
    /// without touching anything when the room already exists. The record
    /// expires after the store's configured TTL.
    async fn create_room(&self, room: &RoomRecord) -> Result<bool>;

    async fn room_exists(&self, room_id: &RoomId) -> Result<bool>;

    async fn room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>>;

    /// Remove the room record, presence hash, and chat history.
    async fn delete_room(&self, room_id: &RoomId) -> Result<()>;

    /// Enumerate ids of every room that currently has a record.
    async fn room_ids(&self) -> Result<Vec<RoomId>>;

    /// Persist the room router's capability descriptor so other instances
    /// can answer capability queries without a live router.
    async fn set_capabilities(&self, room_id: &RoomId, caps: &serde_json::Value) -> Result<()>;

    async fn capabilities(&self, room_id: &RoomId) -> Result<Option<serde_json::Value>>;

    async fn set_instance_id(&self, room_id: &RoomId, instance_id: &InstanceId) -> Result<()>;

    async fn set_public_address(&self, room_id: &RoomId, address: &str) -> Result<()>;

    /// The room's dedicated instance, only when both id and address are
    /// recorded.
    async fn instance_assignment(&self, room_id: &RoomId) -> Result<Option<InstanceAssignment>>;

    async fn public_address(&self, room_id: &RoomId) -> Result<Option<String>>;

    /// Drop the instance id and public address fields (stale or released
    /// instance).
    async fn clear_instance(&self, room_id: &RoomId) -> Result<()>;

    async fn add_member(&self, room_id: &RoomId, member: &PresenceRecord) -> Result<()>;

    /// Remove a member. When the presence hash becomes empty the room
    /// record, presence hash, and chat history are all deleted; returns
    /// `true` in that case.
    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;

    async fn members(&self, room_id: &RoomId) -> Result<Vec<PresenceRecord>>;

    async fn member_count(&self, room_id: &RoomId) -> Result<usize>;

    /// Append a chat entry, trimming the history to the store's configured
    /// bound (oldest entries evicted).
    async fn append_chat(&self, room_id: &RoomId, entry: &ChatRecord) -> Result<()>;

    /// Most recent chat entries, oldest first, at most `limit`.
    async fn recent_chat(&self, room_id: &RoomId, limit: usize) -> Result<Vec<ChatRecord>>;
}
