//! Remote collection gateway: a thin client over the console's REST API.
//!
//! Callers build an [`ApiRequest`] for a named resource and hand it to a
//! [`Gateway`]. The HTTP implementation normalizes every failure into a
//! [`GatewayError`] before it reaches the synchronization layer.

pub mod client;
pub mod config;
pub mod context;
pub mod errors;
pub mod metrics_defs;
pub mod request;

pub use client::HttpGateway;
pub use config::GatewayConfig;
pub use context::RequestContext;
pub use errors::{FailureKind, GatewayError};
pub use request::{ApiRequest, Gateway, GatewayExt};
