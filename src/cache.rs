use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::models::{InventorySnapshot, SessionId};
use crate::redis_client::RedisClient;

// Запись проходит, только если версия не менялась с момента чтения снимка
const PUT_IF_VERSION: &str = r#"
if (redis.call('GET', KEYS[2]) or '0') == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

pub fn seat_map_key(session_id: SessionId) -> String {
    format!("seats:{}", session_id)
}

pub fn seat_map_version_key(session_id: SessionId) -> String {
    format!("seats:{}:version", session_id)
}

/// Сброс схемы после мутации: версия растёт, снимок удаляется.
pub async fn drop_seat_map(conn: &mut MultiplexedConnection, session_id: SessionId) -> redis::RedisResult<()> {
    redis::pipe()
        .atomic()
        .incr(seat_map_version_key(session_id), 1)
        .ignore()
        .del(seat_map_key(session_id))
        .ignore()
        .query_async(conn)
        .await
}

/// Кеш схемы зала для чтения. Источник истины всегда хранилище: кеш только
/// отдаёт последний снимок и сбрасывается после каждой мутации.
///
/// Снимок, прочитанный до мутации, не попадает в кеш после её сброса:
/// `put` сверяет версию, взятую через `version` до чтения из хранилища.
#[derive(Clone)]
pub struct SeatMapCache {
    redis: Option<RedisClient>,
    ttl_seconds: u64,
}

impl SeatMapCache {
    pub fn new(redis: Option<RedisClient>, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    pub async fn get(&self, session_id: SessionId) -> Option<InventorySnapshot> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.conn.clone();

        let raw: Option<String> = match conn.get(seat_map_key(session_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "seat map cache read failed");
                return None;
            }
        };

        // Битый JSON считаем промахом
        raw.and_then(|json| serde_json::from_str(&json).ok())
    }

    /// Текущая версия схемы. `None` - кеш выключен или недоступен.
    pub async fn version(&self, session_id: SessionId) -> Option<u64> {
        let redis = self.redis.as_ref()?;
        let mut conn = redis.conn.clone();
        match conn.get::<_, Option<u64>>(seat_map_version_key(session_id)).await {
            Ok(version) => Some(version.unwrap_or(0)),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "seat map version read failed");
                None
            }
        }
    }

    pub async fn put(&self, snapshot: &InventorySnapshot, version: Option<u64>) {
        let (Some(redis), Some(version)) = (&self.redis, version) else { return };
        let mut conn = redis.conn.clone();
        let session_id = snapshot.session.id;

        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize seat map");
                return;
            }
        };
        let result: redis::RedisResult<i64> = redis::Script::new(PUT_IF_VERSION)
            .key(seat_map_key(session_id))
            .key(seat_map_version_key(session_id))
            .arg(version)
            .arg(json)
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(1) => debug!(session_id = %session_id, "seat map cached"),
            Ok(_) => debug!(session_id = %session_id, version, "seat map changed while reading, not cached"),
            Err(e) => warn!(session_id = %session_id, error = %e, "seat map cache write failed"),
        }
    }

    pub async fn invalidate(&self, session_id: SessionId) {
        let Some(redis) = &self.redis else { return };
        let mut conn = redis.conn.clone();
        if let Err(e) = drop_seat_map(&mut conn, session_id).await {
            warn!(session_id = %session_id, error = %e, "seat map cache invalidation failed");
        }
    }
}
