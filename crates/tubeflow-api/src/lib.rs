//! Axum HTTP ingress for tubeflow.
//!
//! This crate provides:
//! - Submission of `download` and `extract_info` invocations onto the queue
//! - Polling of invocation outcomes and stored progress
//! - Published JSON schemas of the request models
//! - Liveness and readiness checks, and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
