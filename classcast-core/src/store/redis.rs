use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{RedisConfig, RoomConfig};
use crate::error::{Error, Result};
use crate::models::{ChatRecord, InstanceAssignment, InstanceId, PresenceRecord, RoomId, RoomRecord, UserId};

use super::RoomStore;

const FIELD_TEACHER_NAME: &str = "teacherName";
const FIELD_CREATED_AT: &str = "createdAt";
const FIELD_INSTANCE_ID: &str = "instanceId";
const FIELD_PUBLIC_ADDRESS: &str = "publicAddress";
const FIELD_CAPABILITIES: &str = "routerRtpCapabilities";

/// Redis-backed implementation of [`RoomStore`].
///
/// Key layout, per room:
/// - `<prefix>room:{id}` — hash with the record fields above
/// - `<prefix>room:{id}:users` — hash of user id to presence JSON
/// - `<prefix>room:{id}:messages` — list of chat JSON, trimmed to the bound
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    key_prefix: String,
    ttl_seconds: i64,
    chat_history_limit: usize,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(redis: &RedisConfig, room: &RoomConfig) -> Result<Self> {
        let client = Client::open(redis.url.as_str())?;
        let connect = client.get_multiplexed_async_connection();
        let mut conn = timeout(Duration::from_secs(redis.connect_timeout_seconds), connect)
            .await
            .map_err(|_| Error::Internal("Timed out connecting to Redis".to_string()))??;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(pong = %pong, "Connected to Redis");

        Ok(Self {
            conn,
            key_prefix: redis.key_prefix.clone(),
            ttl_seconds: (room.ttl_hours * 3600) as i64,
            chat_history_limit: room.chat_history_limit,
        })
    }

    fn room_key(&self, room_id: &RoomId) -> String {
        format!("{}room:{}", self.key_prefix, room_id.as_str())
    }

    fn users_key(&self, room_id: &RoomId) -> String {
        format!("{}room:{}:users", self.key_prefix, room_id.as_str())
    }

    fn messages_key(&self, room_id: &RoomId) -> String {
        format!("{}room:{}:messages", self.key_prefix, room_id.as_str())
    }
}

#[async_trait]
impl RoomStore for RedisStore {
    async fn create_room(&self, room: &RoomRecord) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = self.room_key(&room.id);

        // HSETNX on the teacher field is the creation guard: losing racers
        // see `false` and leave the existing record untouched.
        let created: bool = conn
            .hset_nx(&key, FIELD_TEACHER_NAME, &room.teacher_name)
            .await?;
        if !created {
            return Ok(false);
        }

        let _: () = conn
            .hset(
                &key,
                FIELD_CREATED_AT,
                room.created_at.timestamp_millis().to_string(),
            )
            .await?;
        if let Some(instance_id) = &room.instance_id {
            let _: () = conn.hset(&key, FIELD_INSTANCE_ID, instance_id.as_str()).await?;
        }
        if let Some(address) = &room.public_address {
            let _: () = conn.hset(&key, FIELD_PUBLIC_ADDRESS, address).await?;
        }
        let _: () = conn.expire(&key, self.ttl_seconds).await?;

        debug!(room_id = %room.id, "Created room record");
        Ok(true)
    }

    async fn room_exists(&self, room_id: &RoomId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.room_key(room_id)).await?;
        Ok(exists)
    }

    async fn room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.room_key(room_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let created_at = fields
            .get(FIELD_CREATED_AT)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_default();

        Ok(Some(RoomRecord {
            id: room_id.clone(),
            teacher_name: fields.get(FIELD_TEACHER_NAME).cloned().unwrap_or_default(),
            created_at,
            instance_id: fields
                .get(FIELD_INSTANCE_ID)
                .map(|v| InstanceId::from_string(v.clone())),
            public_address: fields.get(FIELD_PUBLIC_ADDRESS).cloned(),
        }))
    }

    async fn delete_room(&self, room_id: &RoomId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[
                self.room_key(room_id),
                self.users_key(room_id),
                self.messages_key(room_id),
            ])
            .await?;
        Ok(())
    }

    async fn room_ids(&self) -> Result<Vec<RoomId>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}room:*", self.key_prefix);
        let keys: Vec<String> = conn.keys(pattern).await?;
        let prefix = format!("{}room:", self.key_prefix);

        Ok(keys
            .into_iter()
            .filter(|key| !key.ends_with(":users") && !key.ends_with(":messages"))
            .filter_map(|key| key.strip_prefix(&prefix).map(RoomId::from))
            .collect())
    }

    async fn set_capabilities(&self, room_id: &RoomId, caps: &serde_json::Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.room_key(room_id), FIELD_CAPABILITIES, serde_json::to_string(caps)?)
            .await?;
        Ok(())
    }

    async fn capabilities(&self, room_id: &RoomId) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.room_key(room_id), FIELD_CAPABILITIES).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_instance_id(&self, room_id: &RoomId, instance_id: &InstanceId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.room_key(room_id), FIELD_INSTANCE_ID, instance_id.as_str())
            .await?;
        Ok(())
    }

    async fn set_public_address(&self, room_id: &RoomId, address: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.room_key(room_id), FIELD_PUBLIC_ADDRESS, address)
            .await?;
        Ok(())
    }

    async fn instance_assignment(&self, room_id: &RoomId) -> Result<Option<InstanceAssignment>> {
        let mut conn = self.conn.clone();
        let key = self.room_key(room_id);
        let instance_id: Option<String> = conn.hget(&key, FIELD_INSTANCE_ID).await?;
        let address: Option<String> = conn.hget(&key, FIELD_PUBLIC_ADDRESS).await?;

        Ok(match (instance_id, address) {
            (Some(instance_id), Some(public_address)) => Some(InstanceAssignment {
                instance_id: InstanceId::from_string(instance_id),
                public_address,
            }),
            _ => None,
        })
    }

    async fn public_address(&self, room_id: &RoomId) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let address: Option<String> = conn.hget(self.room_key(room_id), FIELD_PUBLIC_ADDRESS).await?;
        Ok(address)
    }

    async fn clear_instance(&self, room_id: &RoomId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(self.room_key(room_id), &[FIELD_INSTANCE_ID, FIELD_PUBLIC_ADDRESS])
            .await?;
        Ok(())
    }

    async fn add_member(&self, room_id: &RoomId, member: &PresenceRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(
                self.users_key(room_id),
                member.user_id.as_str(),
                serde_json::to_string(member)?,
            )
            .await?;
        Ok(())
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let users_key = self.users_key(room_id);
        let _: () = conn.hdel(&users_key, user_id.as_str()).await?;

        let remaining: usize = conn.hlen(&users_key).await?;
        if remaining == 0 {
            self.delete_room(room_id).await?;
            debug!(room_id = %room_id, "Last member left, removed room keys");
            return Ok(true);
        }
        Ok(false)
    }

    async fn members(&self, room_id: &RoomId) -> Result<Vec<PresenceRecord>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(self.users_key(room_id)).await?;

        Ok(entries
            .into_iter()
            .filter_map(|(user_id, json)| match serde_json::from_str(&json) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(room_id = %room_id, user_id = %user_id, error = %err, "Skipping unreadable presence entry");
                    None
                }
            })
            .collect())
    }

    async fn member_count(&self, room_id: &RoomId) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.hlen(self.users_key(room_id)).await?;
        Ok(count)
    }

    async fn append_chat(&self, room_id: &RoomId, entry: &ChatRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.messages_key(room_id);
        let _: () = conn.rpush(&key, serde_json::to_string(entry)?).await?;
        // Keep only the most recent entries.
        let _: () = conn
            .ltrim(&key, -(self.chat_history_limit as isize), -1)
            .await?;
        Ok(())
    }

    async fn recent_chat(&self, room_id: &RoomId, limit: usize) -> Result<Vec<ChatRecord>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(self.messages_key(room_id), -(limit as isize), -1)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|json| match serde_json::from_str(&json) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(room_id = %room_id, error = %err, "Skipping unreadable chat entry");
                    None
                }
            })
            .collect())
    }
}
