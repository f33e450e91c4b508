//! Rate decider trait for abstracting local and distributed implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::decision::{unix_now, Decision, Usage};
use crate::error::Result;

/// Trait for rate decider implementations.
///
/// This trait abstracts over both the in-process `LocalDecider` and the
/// store-backed `DistributedDecider` so the HTTP layer can work with either.
/// The `_at` methods take the current instant explicitly; the plain forms
/// read the wall clock.
#[async_trait]
pub trait RateDecider: Send + Sync {
    /// Check-and-record one admission for `key` at instant `now`.
    async fn decide_at(&self, key: &str, limit: u64, window: Duration, now: f64)
        -> Result<Decision>;

    /// Report what `decide_at` would see at `now`, without recording anything.
    async fn usage_at(&self, key: &str, limit: u64, window: Duration, now: f64) -> Result<Usage>;

    /// Drop the whole event log for `key`. Resetting an empty key is a no-op.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Short name used in logs and health output.
    fn name(&self) -> &'static str;

    /// Check-and-record one admission for `key` now.
    async fn decide(&self, key: &str, limit: u64, window: Duration) -> Result<Decision> {
        self.decide_at(key, limit, window, unix_now()).await
    }

    /// Current usage for `key`.
    async fn usage(&self, key: &str, limit: u64, window: Duration) -> Result<Usage> {
        self.usage_at(key, limit, window, unix_now()).await
    }
}
