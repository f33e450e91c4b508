//! Rate decision engine: sliding-window-log deciders and their backends.

mod backend;
mod decision;
mod distributed;
mod local;
mod redis_store;
mod shard;
mod store;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use backend::RateDecider;
pub use decision::{unix_now, Decision, Usage};
pub use distributed::{DistributedDecider, DEFAULT_KEY_PREFIX, DEFAULT_TIMEOUT};
pub use local::{spawn_eviction, LocalDecider};
pub use redis_store::{RedisStore, CHECK_AND_RECORD_SCRIPT};
pub use shard::{JumpHash, ShardRouter, MAX_SHARDS};
pub use store::{InMemoryStore, ScriptOutcome, WindowStore};

use crate::config::{BackendConfig, BackendKind};
use crate::error::{GateError, Result};

/// Bound on opening one shard connection at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the decider selected by `config`.
///
/// For the distributed backend this connects to every shard endpoint up
/// front, so a misconfigured endpoint fails startup instead of the first
/// request. `window` bounds local idle eviction.
pub async fn build_decider(
    config: &BackendConfig,
    window: Duration,
) -> Result<Arc<dyn RateDecider>> {
    match config.kind {
        BackendKind::Local => {
            let decider = Arc::new(LocalDecider::new());
            if let Some(every) = config.local_evict_interval_secs {
                spawn_eviction(Arc::clone(&decider), Duration::from_secs(every), window)?;
                info!(every_secs = every, "Idle event log eviction enabled");
            }
            info!("Using local rate decider");
            Ok(decider as Arc<dyn RateDecider>)
        }
        BackendKind::Distributed => {
            let mut shards = Vec::with_capacity(config.endpoints.len());
            for endpoint in &config.endpoints {
                let store = tokio::time::timeout(CONNECT_TIMEOUT, RedisStore::connect(endpoint))
                    .await
                    .map_err(|_| {
                        GateError::BackendUnavailable(format!(
                            "connecting to {} timed out after {:?}",
                            endpoint, CONNECT_TIMEOUT
                        ))
                    })??;
                shards.push(Arc::new(store));
            }
            let router = ShardRouter::new(shards)?;
            info!(
                shards = router.len(),
                prefix = %config.key_prefix,
                "Using distributed rate decider"
            );

            let decider = DistributedDecider::new(router)
                .with_key_prefix(config.key_prefix.clone())
                .with_timeout(config.timeout());
            Ok(Arc::new(decider) as Arc<dyn RateDecider>)
        }
    }
}
