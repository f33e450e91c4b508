//! Backing-store interface for the distributed decider.
//!
//! A `WindowStore` exposes one atomic check-and-record operation over an
//! ordered, score-addressable member set with per-key expiry. `RedisStore`
//! is the production implementation; `InMemoryStore` runs the same unit
//! under a single mutex and stands in for a store in tests and
//! single-node setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{GateError, Result};

/// Result of one check-and-record unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Whether a new member was recorded.
    pub admitted: bool,
    /// Set cardinality after the unit ran.
    pub count: u64,
}

/// A store able to run the sliding-window check-and-record unit atomically.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically: drop members scored below `now - window`, read the
    /// cardinality, and if it is below `limit` add `member` at score `now`
    /// and refresh the key's expiry to `window`.
    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<ScriptOutcome>;

    /// Count members scored at or after `now - window` without modifying
    /// the set.
    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64>;

    /// Delete the key. Deleting an absent key succeeds.
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Key expiry for a window: one millisecond past it, so an entry sitting
/// exactly on the window start is still visible to the pruning rule.
pub fn expiry_for(window: Duration) -> Duration {
    window + Duration::from_millis(1)
}

#[derive(Debug, Default)]
struct SortedSet {
    /// `(score, member)` ascending by score.
    members: Vec<(f64, String)>,
    /// Instant (caller's timeline) at which the key disappears.
    expires_at: f64,
}

/// In-process `WindowStore`.
///
/// Every operation holds one mutex for its whole duration, which gives the
/// same linearization the server-side script gets from the real store.
/// Expiry is evaluated against the `now` the caller supplies.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sets: Mutex<HashMap<String, SortedSet>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every operation, to exercise caller timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of keys physically present, expired or not.
    pub fn key_count(&self) -> usize {
        self.sets.lock().len()
    }

    /// Whether `key` is physically present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.sets.lock().contains_key(key)
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::BackendUnavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    async fn check_and_record(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<ScriptOutcome> {
        self.round_trip().await?;

        let mut sets = self.sets.lock();
        if sets.get(key).is_some_and(|set| set.expires_at <= now) {
            sets.remove(key);
        }

        let window_start = now - window.as_secs_f64();
        let count = match sets.get_mut(key) {
            Some(set) => {
                set.members.retain(|(score, _)| *score >= window_start);
                set.members.len() as u64
            }
            None => 0,
        };

        if count >= limit {
            return Ok(ScriptOutcome {
                admitted: false,
                count,
            });
        }

        let set = sets.entry(key.to_string()).or_default();
        // Same member replaces its score, as in a real sorted set.
        set.members.retain(|(_, existing)| existing != member);
        let pos = set.members.partition_point(|(score, _)| *score <= now);
        set.members.insert(pos, (now, member.to_string()));
        set.expires_at = now + expiry_for(window).as_secs_f64();

        Ok(ScriptOutcome {
            admitted: true,
            count: set.members.len() as u64,
        })
    }

    async fn count(&self, key: &str, now: f64, window: Duration) -> Result<u64> {
        self.round_trip().await?;

        let sets = self.sets.lock();
        let window_start = now - window.as_secs_f64();
        let count = sets
            .get(key)
            .filter(|set| set.expires_at > now)
            .map(|set| set.members.iter().filter(|(score, _)| *score >= window_start).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.round_trip().await?;
        self.sets.lock().remove(key);
        Ok(())
    }
}
