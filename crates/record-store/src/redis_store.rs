//! Redis storage for users and image records
//!
//! Key layout:
//! - `user:next_id` counter, `user:{id}` hash, `user:name:{username}` -> id
//! - `image:next_id` counter, `image:{id}` hash
//! - `image:token:{token}` -> id, `image:stored:{name}` -> id
//! - `images:status:{status}` set of ids
//!
//! Every write that must be atomic runs as a Lua script, so Redis executes it
//! as one uninterrupted step.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use glimpse_common::{Error, ImageRecord, ImageStatus, Result, User};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::store::{predecessors, RecordStore};

// The scripts below build `user:*`, `image:*` and `images:status:*` keys
// inside Lua instead of declaring them in KEYS. That needs a single Redis
// node; Redis Cluster would reject the cross-slot access.

const CREATE_USER: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return -1
end
local id = redis.call('INCR', KEYS[2])
redis.call('SET', KEYS[1], id)
redis.call('HSET', 'user:' .. id, 'id', id, 'username', ARGV[1], 'password_hash', ARGV[2])
return id
"#;

const CREATE_IMAGE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return -1
end
if redis.call('EXISTS', KEYS[2]) == 1 then
  return -2
end
local id = redis.call('INCR', KEYS[3])
redis.call('SET', KEYS[1], id)
redis.call('SET', KEYS[2], id)
redis.call('HSET', 'image:' .. id,
  'id', id,
  'owner_id', ARGV[1],
  'original_name', ARGV[2],
  'stored_name', ARGV[3],
  'access_token', ARGV[4],
  'created_at', ARGV[5],
  'status', 'pending')
redis.call('SADD', KEYS[4], id)
return id
"#;

const MARK_VIEWED: &str = r#"
local id = redis.call('GET', KEYS[1])
if not id then
  return 0
end
local key = 'image:' .. id
if redis.call('HGET', key, 'status') ~= 'pending' then
  return 0
end
redis.call('HSET', key, 'status', 'viewed', 'viewed_at', ARGV[1])
redis.call('SMOVE', 'images:status:pending', 'images:status:viewed', id)
return 1
"#;

// ARGV: id, next status, timestamp, allowed current statuses...
const UPDATE_STATUS: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return 0
end
for i = 4, #ARGV do
  if current == ARGV[i] then
    redis.call('HSET', KEYS[1], 'status', ARGV[2])
    if ARGV[2] == 'viewed' then
      redis.call('HSET', KEYS[1], 'viewed_at', ARGV[3])
    end
    redis.call('SMOVE', 'images:status:' .. current, 'images:status:' .. ARGV[2], ARGV[1])
    return 1
  end
end
return 0
"#;

fn storage_err(e: RedisError) -> Error {
    Error::Storage(e.to_string())
}

fn user_name_key(username: &str) -> String {
    format!("user:name:{}", username)
}

fn image_key(id: i64) -> String {
    format!("image:{}", id)
}

fn token_key(access_token: &str) -> String {
    format!("image:token:{}", access_token)
}

fn stored_name_key(stored_name: &str) -> String {
    format!("image:stored:{}", stored_name)
}

fn status_key(status: ImageStatus) -> String {
    format!("images:status:{}", status)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn field<'a>(hash: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    hash.get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::Storage(format!("record is missing field '{}'", name)))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| Error::Storage(format!("bad id '{}'", raw)))
}

fn record_from_hash(hash: &HashMap<String, String>) -> Result<ImageRecord> {
    let viewed_at = match hash.get("viewed_at") {
        Some(raw) if !raw.is_empty() => Some(parse_time(raw)?),
        _ => None,
    };

    Ok(ImageRecord {
        id: parse_id(field(hash, "id")?)?,
        owner_id: parse_id(field(hash, "owner_id")?)?,
        original_name: field(hash, "original_name")?.to_string(),
        stored_name: field(hash, "stored_name")?.to_string(),
        access_token: field(hash, "access_token")?.to_string(),
        created_at: parse_time(field(hash, "created_at")?)?,
        viewed_at,
        status: field(hash, "status")?
            .parse()
            .map_err(Error::Storage)?,
    })
}

/// Redis-backed [`RecordStore`]
pub struct RedisStore {
    conn: ConnectionManager,
    create_user: Script,
    create_image: Script,
    mark_viewed: Script,
    update_status: Script,
}

impl RedisStore {
    /// Connect to `redis_url`
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(storage_err)?;
        let conn = ConnectionManager::new(client).await.map_err(storage_err)?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            create_user: Script::new(CREATE_USER),
            create_image: Script::new(CREATE_IMAGE),
            mark_viewed: Script::new(MARK_VIEWED),
            update_status: Script::new(UPDATE_STATUS),
        })
    }

    async fn load_image(&self, id: i64) -> Result<Option<ImageRecord>> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> =
            conn.hgetall(image_key(id)).await.map_err(storage_err)?;
        if hash.is_empty() {
            return Ok(None);
        }
        record_from_hash(&hash).map(Some)
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let id: i64 = self
            .create_user
            .key(user_name_key(username))
            .key("user:next_id")
            .arg(username)
            .arg(password_hash)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        if id < 0 {
            debug!("Username already taken: {}", username);
            return Err(Error::DuplicateUsername(username.to_string()));
        }

        info!("Created user {} ({})", id, username);
        Ok(id)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let mut conn = self.conn.clone();
        let id: Option<i64> = conn
            .get(user_name_key(username))
            .await
            .map_err(storage_err)?;
        let Some(id) = id else {
            return Ok(None);
        };

        let hash: HashMap<String, String> = conn
            .hgetall(format!("user:{}", id))
            .await
            .map_err(storage_err)?;
        if hash.is_empty() {
            return Ok(None);
        }

        Ok(Some(User {
            id,
            username: field(&hash, "username")?.to_string(),
            password_hash: field(&hash, "password_hash")?.to_string(),
        }))
    }

    async fn create_image_record(
        &self,
        owner_id: i64,
        original_name: &str,
        stored_name: &str,
        access_token: &str,
    ) -> Result<i64> {
        let mut conn = self.conn.clone();
        let id: i64 = self
            .create_image
            .key(token_key(access_token))
            .key(stored_name_key(stored_name))
            .key("image:next_id")
            .key(status_key(ImageStatus::Pending))
            .arg(owner_id)
            .arg(original_name)
            .arg(stored_name)
            .arg(access_token)
            .arg(timestamp(Utc::now()))
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        match id {
            -1 => Err(Error::DuplicateToken),
            -2 => Err(Error::DuplicateStoredName),
            id => {
                debug!("Created image record {} for owner {}", id, owner_id);
                Ok(id)
            }
        }
    }

    async fn find_by_token(&self, access_token: &str) -> Result<Option<ImageRecord>> {
        let mut conn = self.conn.clone();
        let id: Option<i64> = conn
            .get(token_key(access_token))
            .await
            .map_err(storage_err)?;

        match id {
            Some(id) => self.load_image(id).await,
            None => Ok(None),
        }
    }

    async fn mark_viewed(&self, access_token: &str) -> Result<DateTime<Utc>> {
        let stamp = timestamp(Utc::now());
        let mut conn = self.conn.clone();
        let changed: i64 = self
            .mark_viewed
            .key(token_key(access_token))
            .arg(&stamp)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        if changed == 1 {
            // Round-trip through the stored text so callers see what a reload returns
            parse_time(&stamp)
        } else {
            Err(Error::NotPending)
        }
    }

    async fn update_status(&self, id: i64, status: ImageStatus) -> Result<bool> {
        let allowed = predecessors(status);
        if allowed.is_empty() {
            return Ok(false);
        }

        let mut invocation = self.update_status.key(image_key(id));
        invocation
            .arg(id)
            .arg(status.as_str())
            .arg(timestamp(Utc::now()));
        for from in allowed {
            invocation.arg(from.as_str());
        }

        let mut conn = self.conn.clone();
        let changed: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;

        if changed != 1 {
            debug!("Rejected status change for image {} -> {}", id, status);
        }
        Ok(changed == 1)
    }

    async fn list_by_status(&self, status: ImageStatus, limit: usize) -> Result<Vec<ImageRecord>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(status_key(status))
            .await
            .map_err(storage_err)?;

        let mut ids = members
            .iter()
            .map(|raw| parse_id(raw))
            .collect::<Result<Vec<i64>>>()?;
        ids.sort_unstable();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            // The index may briefly disagree with the hash; trust the hash.
            if let Some(record) = self.load_image(id).await? {
                if record.status == status {
                    records.push(record);
                }
            }
        }
        records.sort_by_key(|record| (record.viewed_at, record.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
