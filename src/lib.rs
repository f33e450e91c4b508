//! Windgate - Sliding-Window Admission Control
//!
//! This crate implements an admission gate for AI model-serving endpoints.
//! Each `(caller, resource)` pair is limited by an exact sliding-window log,
//! evaluated either in process or atomically inside a sharded Redis
//! keyspace shared by every gateway node.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod tiers;
