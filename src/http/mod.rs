//! HTTP adapter in front of the rate decision engine.
//!
//! Resolves tenant/model tiers into a limit and forwards `(subject, limit,
//! window)` to the configured decider.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{
    router, AllowRequest, AllowResponse, ApiError, AppState, ResetResponse, SharedState,
    UsageQuery, UsageResponse,
};
