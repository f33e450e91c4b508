//! Key-to-shard routing for the distributed decider.
//!
//! Keys are mapped with Jump Consistent Hash ("A Fast, Minimal Memory,
//! Consistent Hash Algorithm", Lamping & Veach) over a SHA-256 prefix of
//! the key. Both halves are stable across processes and toolchains, so
//! every gateway node agrees on where a subject's log lives.
//!
//! Going from N to N+1 shards remaps about 1/(N+1) of the keys, all onto
//! the new shard. Those subjects start a fresh window there.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{GateError, Result};

/// Upper bound on the number of shards a router accepts.
pub const MAX_SHARDS: usize = 1024;

/// Jump consistent hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct JumpHash;

impl JumpHash {
    /// Stable 64-bit hash of `key`.
    pub fn key_hash(key: &str) -> u64 {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Map `key` to a bucket in `[0, num_buckets)`.
    pub fn bucket(key: &str, num_buckets: u32) -> u32 {
        Self::bucket_u64(Self::key_hash(key), num_buckets)
    }

    /// Map a pre-hashed key to a bucket in `[0, num_buckets)`.
    /// `num_buckets == 0` yields bucket 0.
    #[inline]
    pub fn bucket_u64(mut key: u64, num_buckets: u32) -> u32 {
        let num_buckets = i64::from(num_buckets);
        let mut bucket: i64 = 0;
        let mut next: i64 = 0;

        while next < num_buckets {
            bucket = next;
            key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
            next = ((bucket + 1) as f64 * ((1_i64 << 31) as f64 / ((key >> 33) + 1) as f64))
                as i64;
        }

        bucket as u32
    }

    /// Whether `key` changes bucket when going from `old` to `new` buckets.
    pub fn would_move(key: &str, old: u32, new: u32) -> bool {
        let hash = Self::key_hash(key);
        Self::bucket_u64(hash, old) != Self::bucket_u64(hash, new)
    }
}

/// Routes subject keys to one of a fixed set of stores.
#[derive(Debug)]
pub struct ShardRouter<S> {
    shards: Vec<Arc<S>>,
}

impl<S> ShardRouter<S> {
    /// Create a router over `shards`, in shard-index order.
    pub fn new(shards: Vec<Arc<S>>) -> Result<Self> {
        if shards.is_empty() {
            return Err(GateError::Config("at least one shard is required".to_string()));
        }
        if shards.len() > MAX_SHARDS {
            return Err(GateError::Config(format!(
                "at most {} shards are supported, got {}",
                MAX_SHARDS,
                shards.len()
            )));
        }
        Ok(Self { shards })
    }

    /// A router over exactly one store.
    pub fn single(store: Arc<S>) -> Self {
        Self {
            shards: vec![store],
        }
    }

    /// Index of the shard owning `key`.
    pub fn shard_for(&self, key: &str) -> usize {
        JumpHash::bucket(key, self.shards.len() as u32) as usize
    }

    /// The store owning `key`.
    pub fn route(&self, key: &str) -> &Arc<S> {
        &self.shards[self.shard_for(key)]
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false: a router holds at least one shard.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// All shards in index order.
    pub fn shards(&self) -> &[Arc<S>] {
        &self.shards
    }
}
