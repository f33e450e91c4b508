//! Distributed rate decider backed by an external ordered-set store.
//!
//! All counting happens inside the store's atomic check-and-record unit, so
//! any number of gateway processes can share one logical keyspace without
//! client-side locking. The keyspace is partitioned across shards by the
//! `ShardRouter`; a subject's log always lives on exactly one shard.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::backend::RateDecider;
use super::decision::{validate, validate_key, Decision, Usage};
use super::shard::ShardRouter;
use super::store::WindowStore;
use crate::error::{GateError, Result};

/// Default namespace for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";
/// Default bound on one store round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// A rate decider whose state lives in one or more `WindowStore` shards.
pub struct DistributedDecider<S: WindowStore> {
    router: ShardRouter<S>,
    key_prefix: String,
    timeout: Duration,
}

impl<S: WindowStore> DistributedDecider<S> {
    /// Create a decider over the given shards.
    pub fn new(router: ShardRouter<S>) -> Self {
        Self {
            router,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Namespace store keys under `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Bound every store call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The store key holding `key`'s event log.
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get the shard router.
    pub fn router(&self) -> &ShardRouter<S> {
        &self.router
    }

    /// Run one store call under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &'static str,
        key: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op = op, key = %key, error = %e, "Store call failed");
                Err(match e {
                    GateError::BackendUnavailable(_) => e,
                    other => GateError::BackendUnavailable(other.to_string()),
                })
            }
            Err(_) => {
                warn!(op = op, key = %key, timeout = ?self.timeout, "Store call timed out");
                Err(GateError::BackendUnavailable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }
}

/// A set member unique even when two admissions share a timestamp.
fn unique_member(now: f64) -> String {
    format!("{}-{}", now, Uuid::new_v4().simple())
}

#[async_trait]
impl<S: WindowStore + 'static> RateDecider for DistributedDecider<S> {
    async fn decide_at(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: f64,
    ) -> Result<Decision> {
        validate(key, limit, window)?;

        let store_key = self.store_key(key);
        let shard = self.router.route(key);
        let member = unique_member(now);

        trace!(
            key = %store_key,
            shard = self.router.shard_for(key),
            limit = limit,
            "Checking distributed rate limit"
        );

        let outcome = self
            .bounded(
                "check_and_record",
                &store_key,
                shard.check_and_record(&store_key, now, window, limit, &member),
            )
            .await?;

        if outcome.admitted {
            Ok(Decision::admitted(outcome.count, limit, window))
        } else {
            debug!(
                key = %store_key,
                count = outcome.count,
                limit = limit,
                "Distributed rate limit exceeded"
            );
            Ok(Decision::denied(outcome.count, window))
        }
    }

    async fn usage_at(&self, key: &str, limit: u64, window: Duration, now: f64) -> Result<Usage> {
        validate(key, limit, window)?;

        let store_key = self.store_key(key);
        let shard = self.router.route(key);
        let used = self
            .bounded("count", &store_key, shard.count(&store_key, now, window))
            .await?;
        Ok(Usage::new(used, limit, window))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let store_key = self.store_key(key);
        let shard = self.router.route(key);
        self.bounded("clear", &store_key, shard.clear(&store_key)).await?;
        debug!(key = %store_key, "Event log reset");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}
