//! In-process sliding-window-log decider.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::RateDecider;
use super::decision::{unix_now, validate, validate_key, Decision, Usage};
use crate::error::{GateError, Result};

/// Admission timestamps for one subject, ascending.
type EventLog = VecDeque<f64>;

/// Shared handle to one subject's log and its exclusive lock.
type LogHandle = Arc<Mutex<EventLog>>;

/// The in-memory rate decider.
///
/// Each subject key owns a `Mutex`-guarded log of admission timestamps.
/// The `DashMap` shard lock only guards lookup and creation of those
/// handles and is always released before a key lock is taken, so requests
/// for distinct keys never wait on each other while requests for the same
/// key are fully serialized.
pub struct LocalDecider {
    logs: DashMap<String, LogHandle>,
}

impl LocalDecider {
    /// Create an empty decider.
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Get the handle for `key`, creating it on first use.
    fn handle(&self, key: &str) -> LogHandle {
        if let Some(existing) = self.logs.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.logs.entry(key.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Check-and-record one admission for `key` at `now`.
    pub fn check(&self, key: &str, limit: u64, window: Duration, now: f64) -> Result<Decision> {
        validate(key, limit, window)?;

        let handle = self.handle(key);
        let mut log = handle.lock();

        let window_start = now - window.as_secs_f64();
        while log.front().is_some_and(|&ts| ts < window_start) {
            log.pop_front();
        }

        let used = log.len() as u64;
        if used >= limit {
            debug!(key = %key, used = used, limit = limit, "Rate limit exceeded");
            return Ok(Decision::denied(used, window));
        }

        // Keep the log ordered even if the caller's clock stepped backwards.
        let pos = log.partition_point(|&ts| ts <= now);
        log.insert(pos, now);

        trace!(key = %key, used = used + 1, limit = limit, "Admitted");
        Ok(Decision::admitted(used + 1, limit, window))
    }

    /// Count the admissions `check` would see at `now`. Never creates or
    /// mutates a log.
    pub fn peek(&self, key: &str, limit: u64, window: Duration, now: f64) -> Result<Usage> {
        validate(key, limit, window)?;

        let Some(handle) = self.logs.get(key).map(|h| Arc::clone(h.value())) else {
            return Ok(Usage::new(0, limit, window));
        };
        let log = handle.lock();

        let window_start = now - window.as_secs_f64();
        let expired = log.partition_point(|&ts| ts < window_start);
        Ok(Usage::new((log.len() - expired) as u64, limit, window))
    }

    /// Clear the log for `key` under its lock.
    ///
    /// The map entry is dropped afterwards only if nobody else holds the
    /// handle; an in-flight `check` keeps the (now empty) entry alive.
    pub fn clear(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let Some(handle) = self.logs.get(key).map(|h| Arc::clone(h.value())) else {
            return Ok(());
        };
        handle.lock().clear();
        drop(handle);

        self.logs
            .remove_if(key, |_, log| Arc::strong_count(log) == 1 && log.lock().is_empty());
        debug!(key = %key, "Event log reset");
        Ok(())
    }

    /// Remove logs whose newest admission is older than `now - idle_for`.
    ///
    /// `idle_for` must be at least the widest window callers use, otherwise
    /// history that still counts could be dropped. Logs currently held by a
    /// caller are skipped. Returns the number of evicted keys.
    pub fn evict_idle(&self, idle_for: Duration, now: f64) -> usize {
        let cutoff = now - idle_for.as_secs_f64();
        let mut evicted = 0;

        self.logs.retain(|_, log| {
            if Arc::strong_count(log) > 1 {
                return true;
            }
            let keep = log.lock().back().is_some_and(|&ts| ts >= cutoff);
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.logs.len(), "Evicted idle event logs");
        }
        evicted
    }

    /// Number of subject keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

impl Default for LocalDecider {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `evict_idle` on a fixed interval until the task is aborted.
///
/// Must be called from within a tokio runtime. A zero `every` is rejected.
pub fn spawn_eviction(
    decider: Arc<LocalDecider>,
    every: Duration,
    idle_for: Duration,
) -> Result<tokio::task::JoinHandle<()>> {
    if every.is_zero() {
        return Err(GateError::InvalidInput(
            "eviction interval must be > 0".to_string(),
        ));
    }

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            decider.evict_idle(idle_for, unix_now());
        }
    }))
}

#[async_trait]
impl RateDecider for LocalDecider {
    async fn decide_at(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now: f64,
    ) -> Result<Decision> {
        self.check(key, limit, window, now)
    }

    async fn usage_at(&self, key: &str, limit: u64, window: Duration, now: f64) -> Result<Usage> {
        self.peek(key, limit, window, now)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.clear(key)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_exact_admissions_then_denials() {
        let decider = LocalDecider::new();
        let limit = 5;

        let results: Vec<Decision> = (0..limit + 5)
            .map(|i| decider.check("user1:gpt-4", limit, MINUTE, i as f64 * 0.01).unwrap())
            .collect();

        let admitted = results.iter().filter(|d| d.allowed).count() as u64;
        assert_eq!(admitted, limit);
        assert!(results[..limit as usize].iter().all(|d| d.allowed));
        for denied in &results[limit as usize..] {
            assert!(!denied.allowed);
            assert_eq!(denied.used, limit);
            assert_eq!(denied.remaining, 0);
        }
    }

    #[test]
    fn test_three_per_minute_scenario() {
        let decider = LocalDecider::new();
        let key = "alice:claude-3-opus";

        for (t, used) in [(0.0, 1), (1.0, 2), (2.0, 3)] {
            let decision = decider.check(key, 3, MINUTE, t).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.used, used);
            assert_eq!(decision.remaining, 3 - used);
        }

        let decision = decider.check(key, 3, MINUTE, 3.0).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.used, 3);
        assert_eq!(decision.remaining, 0);

        // The t=0 entry has left the window; t=1 and t=2 are still inside it.
        let decision = decider.check(key, 3, MINUTE, 61.0).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.used, 3);

        // Once t=1 and t=2 also expire only the t=61 admission remains.
        let usage = decider.peek(key, 3, MINUTE, 62.5).unwrap();
        assert_eq!(usage.used, 1);
    }

    #[test]
    fn test_no_boundary_burst() {
        let decider = LocalDecider::new();
        let window = Duration::from_secs(10);
        let eps = 0.001;

        for _ in 0..4 {
            assert!(decider.check("k", 4, window, 0.0).unwrap().allowed);
        }
        assert!(!decider.check("k", 4, window, 10.0 - eps).unwrap().allowed);

        // Just past the boundary all four t=0 entries expire together.
        let decision = decider.check("k", 4, window, 10.0 + eps).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.used, 1);
    }

    #[test]
    fn test_entry_on_window_start_still_counts() {
        let decider = LocalDecider::new();
        let window = Duration::from_secs(10);

        assert!(decider.check("k", 1, window, 0.0).unwrap().allowed);
        assert!(!decider.check("k", 1, window, 10.0).unwrap().allowed);
        assert!(decider.check("k", 1, window, 10.5).unwrap().allowed);
    }

    #[test]
    fn test_separate_keys() {
        let decider = LocalDecider::new();
        for _ in 0..5 {
            decider.check("user1:gpt-4", 5, MINUTE, 1.0).unwrap();
        }

        assert!(!decider.check("user1:gpt-4", 5, MINUTE, 1.0).unwrap().allowed);
        assert!(decider.check("user2:gpt-4", 5, MINUTE, 1.0).unwrap().allowed);
        assert!(decider.check("user1:gpt-3.5", 5, MINUTE, 1.0).unwrap().allowed);
    }

    #[test]
    fn test_concurrent_callers_one_key() {
        let decider = Arc::new(LocalDecider::new());
        let limit = 100;

        let workers: Vec<_> = (0..150)
            .map(|_| {
                let decider = Arc::clone(&decider);
                thread::spawn(move || {
                    decider
                        .check("user1:gpt-4", limit, MINUTE, unix_now())
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let admitted = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 100);
        assert_eq!(decider.peek("user1:gpt-4", limit, MINUTE, unix_now()).unwrap().used, 100);
    }

    #[test]
    fn test_concurrent_callers_below_limit() {
        let decider = Arc::new(LocalDecider::new());

        let workers: Vec<_> = (0..20)
            .map(|_| {
                let decider = Arc::clone(&decider);
                thread::spawn(move || decider.check("shared", 50, MINUTE, 5.0).unwrap().allowed)
            })
            .collect();

        let admitted = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 20);
    }

    #[test]
    fn test_peek_does_not_create_or_record() {
        let decider = LocalDecider::new();

        let usage = decider.peek("ghost", 10, MINUTE, 0.0).unwrap();
        assert_eq!(usage.used, 0);
        assert_eq!(usage.remaining, 10);
        assert_eq!(decider.tracked_keys(), 0);

        decider.check("k", 10, MINUTE, 0.0).unwrap();
        decider.check("k", 10, MINUTE, 30.0).unwrap();
        assert_eq!(decider.peek("k", 10, MINUTE, 30.0).unwrap().used, 2);
        assert_eq!(decider.peek("k", 10, MINUTE, 75.0).unwrap().used, 1);
        // Peeking past the window did not prune: going back in time still sees both.
        assert_eq!(decider.peek("k", 10, MINUTE, 30.0).unwrap().used, 2);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let decider = LocalDecider::new();
        for _ in 0..5 {
            decider.check("user1:gpt-4", 5, MINUTE, 1.0).unwrap();
        }
        assert!(!decider.check("user1:gpt-4", 5, MINUTE, 1.0).unwrap().allowed);

        decider.clear("user1:gpt-4").unwrap();
        assert_eq!(decider.peek("user1:gpt-4", 5, MINUTE, 1.0).unwrap().used, 0);
        assert_eq!(decider.tracked_keys(), 0);

        decider.clear("user1:gpt-4").unwrap();
        assert_eq!(decider.peek("user1:gpt-4", 5, MINUTE, 1.0).unwrap().used, 0);

        assert!(decider.check("user1:gpt-4", 5, MINUTE, 1.0).unwrap().allowed);
    }

    #[test]
    fn test_reset_keeps_entry_held_by_another_caller() {
        let decider = LocalDecider::new();
        decider.check("k", 5, MINUTE, 1.0).unwrap();

        let held = decider.handle("k");
        decider.clear("k").unwrap();

        assert_eq!(decider.tracked_keys(), 1);
        assert!(held.lock().is_empty());
    }

    #[test]
    fn test_invalid_input_touches_nothing() {
        let decider = LocalDecider::new();

        assert!(matches!(decider.check("", 1, MINUTE, 0.0), Err(GateError::InvalidInput(_))));
        assert!(matches!(decider.check("k", 0, MINUTE, 0.0), Err(GateError::InvalidInput(_))));
        assert!(matches!(
            decider.check("k", 1, Duration::ZERO, 0.0),
            Err(GateError::InvalidInput(_))
        ));
        assert!(matches!(decider.clear(""), Err(GateError::InvalidInput(_))));
        assert_eq!(decider.tracked_keys(), 0);
    }

    #[test]
    fn test_out_of_order_timestamp_stays_sorted() {
        let decider = LocalDecider::new();
        decider.check("k", 10, MINUTE, 50.0).unwrap();
        decider.check("k", 10, MINUTE, 40.0).unwrap();

        // At t=105 the window starts at 45: only the t=50 entry remains.
        assert_eq!(decider.peek("k", 10, MINUTE, 105.0).unwrap().used, 1);
    }

    #[test]
    fn test_evict_idle() {
        let decider = LocalDecider::new();
        decider.check("old", 5, MINUTE, 0.0).unwrap();
        decider.check("fresh", 5, MINUTE, 100.0).unwrap();

        let evicted = decider.evict_idle(MINUTE, 120.0);

        assert_eq!(evicted, 1);
        assert_eq!(decider.tracked_keys(), 1);
        assert_eq!(decider.peek("fresh", 5, MINUTE, 120.0).unwrap().used, 1);
    }

    #[test]
    fn test_evict_skips_held_logs() {
        let decider = LocalDecider::new();
        decider.check("old", 5, MINUTE, 0.0).unwrap();

        let _held = decider.handle("old");
        assert_eq!(decider.evict_idle(MINUTE, 500.0), 0);
        assert_eq!(decider.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_spawn_eviction_sweeps_idle_logs() {
        let decider = Arc::new(LocalDecider::new());
        decider.check("old", 5, MINUTE, 0.0).unwrap();

        let task =
            spawn_eviction(Arc::clone(&decider), Duration::from_millis(10), MINUTE).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert_eq!(decider.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_spawn_eviction_rejects_zero_interval() {
        let decider = Arc::new(LocalDecider::new());

        let result = spawn_eviction(decider, Duration::ZERO, MINUTE);
        assert!(matches!(result, Err(GateError::InvalidInput(_))));
    }

    #[test]
    fn test_trait_object_dispatch() {
        let decider: Arc<dyn RateDecider> = Arc::new(LocalDecider::new());

        tokio_test::block_on(async {
            let first = decider.decide_at("k", 2, MINUTE, 0.0).await.unwrap();
            assert!(first.allowed);

            let usage = decider.usage_at("k", 2, MINUTE, 1.0).await.unwrap();
            assert_eq!(usage.used, 1);
            assert_eq!(usage.remaining, 1);

            decider.reset("k").await.unwrap();
            let usage = decider.usage_at("k", 2, MINUTE, 1.0).await.unwrap();
            assert_eq!(usage.used, 0);
        });
        assert_eq!(decider.name(), "local");
    }

    #[tokio::test]
    async fn test_wall_clock_decide() {
        let decider = LocalDecider::new();

        assert!(decider.decide("k", 1, MINUTE).await.unwrap().allowed);
        assert!(!decider.decide("k", 1, MINUTE).await.unwrap().allowed);
        assert_eq!(decider.usage("k", 1, MINUTE).await.unwrap().used, 1);
    }
}
