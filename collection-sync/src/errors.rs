use crate::entity::EntityId;
use gateway::GatewayError;
use thiserror::Error;

/// Result type alias for synchronization operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors surfaced by a screen's cache and mutation engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("entity not found: {0}")]
    NotFound(EntityId),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("screen is closed")]
    Closed,
}
