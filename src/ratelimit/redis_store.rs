//! Redis-backed `WindowStore`.
//!
//! Each subject's event log is a sorted set scored by admission time. The
//! check-and-record unit runs as a single Lua script, so Redis serializes
//! it against every other command touching the key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{AsyncCommands, Script};
use tracing::{info, trace};

use super::store::{expiry_for, ScriptOutcome, WindowStore};
use crate::error::{GateError, Result};

/// KEYS[1] = set key
/// ARGV[1] = now, ARGV[2] = window start, ARGV[3] = limit,
/// ARGV[4] = member, ARGV[5] = expiry in milliseconds
///
/// Returns `{admitted, count}`.
pub const CHECK_AND_RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. ARGV[2])

local count = redis.call('ZCARD', key)
if count >= limit then
    return {0, count}
end

redis.call('ZADD', key, ARGV[1], ARGV[4])
redis.call('PEXPIRE', key, ARGV[5])
return {1, count + 1}
"#;

/// A connection to one Redis shard.
///
/// Generic over the async connection so the command wiring can be exercised
/// against an in-process mock; production code uses `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStore<C = ConnectionManager> {
    endpoint: String,
    conn: C,
    script: Script,
}

impl<C> std::fmt::Debug for RedisStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl RedisStore<ConnectionManager> {
    /// Open a managed connection to `endpoint` (a `redis://` URL).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let client = redis::Client::open(endpoint)
            .map_err(|e| GateError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;
        let conn = ConnectionManager::new(client).await?;

        info!(endpoint = %endpoint, "Connected to Redis shard");

        Ok(Self::with_connection(endpoint, conn))
    }
}

impl<C> RedisStore<C> {
    /// Wrap an already established connection.
    pub fn with_connection(endpoint: impl Into<String>, conn: C) -> Self {
        Self {
            endpoint: endpoint.into(),
            conn,
            script: Script::new(CHECK_AND_RECORD_SCRIPT),
        }
    }

    /// The URL this store was opened with.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl<C> WindowStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<ScriptOutcome> {
        let mut conn = self.conn.clone();
        let window_start = now - window.as_secs_f64();
        let expiry_ms = expiry_for(window).as_millis() as u64;

        // EVALSHA first, falling back to EVAL (and caching) on NOSCRIPT.
        let (admitted, count): (i64, u64) = self
            .script
            .key(key)
            .arg(now)
            .arg(window_start)
            .arg(limit)
            .arg(member)
            .arg(expiry_ms)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %key, admitted = admitted, count = count, "Script executed");

        Ok(ScriptOutcome {
            admitted: admitted == 1,
            count,
        })
    }

    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let window_start = now - window.as_secs_f64();
        let count: u64 = conn.zcount(key, window_start, "+inf").await?;
        Ok(count)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }
}
