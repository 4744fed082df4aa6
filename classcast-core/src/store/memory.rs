use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::RoomConfig;
use crate::error::Result;
use crate::models::{ChatRecord, InstanceAssignment, InstanceId, PresenceRecord, RoomId, RoomRecord, UserId};

use super::RoomStore;

#[derive(Default)]
struct MemRoom {
    teacher_name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    instance_id: Option<InstanceId>,
    public_address: Option<String>,
    capabilities: Option<serde_json::Value>,
    members: HashMap<UserId, PresenceRecord>,
    chat: VecDeque<ChatRecord>,
}

/// In-memory implementation of [`RoomStore`] for tests and single-instance
/// development. TTL expiry is not simulated; records live until removed.
#[derive(Clone)]
pub struct MemoryStore {
    rooms: Arc<Mutex<HashMap<RoomId, MemRoom>>>,
    chat_history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RoomConfig::default())
    }

    #[must_use]
    pub fn with_config(room: &RoomConfig) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            chat_history_limit: room.chat_history_limit,
        }
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(&self, room: &RoomRecord) -> Result<bool> {
        let mut rooms = self.rooms.lock();
        if rooms.contains_key(&room.id) {
            return Ok(false);
        }
        rooms.insert(
            room.id.clone(),
            MemRoom {
                teacher_name: room.teacher_name.clone(),
                created_at: room.created_at,
                instance_id: room.instance_id.clone(),
                public_address: room.public_address.clone(),
                ..Default::default()
            },
        );
        Ok(true)
    }

    async fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        Ok(self.rooms.lock().contains_key(room_id))
    }

    async fn room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        Ok(self.rooms.lock().get(room_id).map(|room| RoomRecord {
            id: room_id.clone(),
            teacher_name: room.teacher_name.clone(),
            created_at: room.created_at,
            instance_id: room.instance_id.clone(),
            public_address: room.public_address.clone(),
        }))
    }

    async fn delete_room(&self, room_id: &RoomId) -> Result<()> {
        self.rooms.lock().remove(room_id);
        Ok(())
    }

    async fn room_ids(&self) -> Result<Vec<RoomId>> {
        Ok(self.rooms.lock().keys().cloned().collect())
    }

    async fn set_capabilities(&self, room_id: &RoomId, caps: &serde_json::Value) -> Result<()> {
        if let Some(room) = self.rooms.lock().get_mut(room_id) {
            room.capabilities = Some(caps.clone());
        }
        Ok(())
    }

    async fn capabilities(&self, room_id: &RoomId) -> Result<Option<serde_json::Value>> {
        Ok(self
            .rooms
            .lock()
            .get(room_id)
            .and_then(|room| room.capabilities.clone()))
    }

    async fn set_instance_id(&self, room_id: &RoomId, instance_id: &InstanceId) -> Result<()> {
        if let Some(room) = self.rooms.lock().get_mut(room_id) {
            room.instance_id = Some(instance_id.clone());
        }
        Ok(())
    }

    async fn set_public_address(&self, room_id: &RoomId, address: &str) -> Result<()> {
        if let Some(room) = self.rooms.lock().get_mut(room_id) {
            room.public_address = Some(address.to_string());
        }
        Ok(())
    }

    async fn instance_assignment(&self, room_id: &RoomId) -> Result<Option<InstanceAssignment>> {
        Ok(self.rooms.lock().get(room_id).and_then(|room| {
            match (&room.instance_id, &room.public_address) {
                (Some(instance_id), Some(public_address)) => Some(InstanceAssignment {
                    instance_id: instance_id.clone(),
                    public_address: public_address.clone(),
                }),
                _ => None,
            }
        }))
    }

    async fn public_address(&self, room_id: &RoomId) -> Result<Option<String>> {
        Ok(self
            .rooms
            .lock()
            .get(room_id)
            .and_then(|room| room.public_address.clone()))
    }

    async fn clear_instance(&self, room_id: &RoomId) -> Result<()> {
        if let Some(room) = self.rooms.lock().get_mut(room_id) {
            room.instance_id = None;
            room.public_address = None;
        }
        Ok(())
    }

    async fn add_member(&self, room_id: &RoomId, member: &PresenceRecord) -> Result<()> {
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(room_id.clone()).or_default();
        room.members.insert(member.user_id.clone(), member.clone());
        Ok(())
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get_mut(room_id) {
            room.members.remove(user_id);
            if room.members.is_empty() {
                rooms.remove(room_id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn members(&self, room_id: &RoomId) -> Result<Vec<PresenceRecord>> {
        Ok(self
            .rooms
            .lock()
            .get(room_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn member_count(&self, room_id: &RoomId) -> Result<usize> {
        Ok(self
            .rooms
            .lock()
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0))
    }

    async fn append_chat(&self, room_id: &RoomId, entry: &ChatRecord) -> Result<()> {
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(room_id.clone()).or_default();
        room.chat.push_back(entry.clone());
        while room.chat.len() > self.chat_history_limit {
            room.chat.pop_front();
        }
        Ok(())
    }

    async fn recent_chat(&self, room_id: &RoomId, limit: usize) -> Result<Vec<ChatRecord>> {
        Ok(self
            .rooms
            .lock()
            .get(room_id)
            .map(|room| {
                room.chat
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
