use crate::entity::{Entity, ViewFilter};
use async_trait::async_trait;
use gateway::GatewayError;

/// Where a cache gets its entities from.
///
/// The join shape lives here: a source that `joins()` is asked for every
/// entity's related items after the primary list has been fetched.
#[async_trait]
pub trait CollectionSource<E: Entity>: Send + Sync + 'static {
    /// Plural resource name, used in logs and user-facing messages.
    fn name(&self) -> &'static str;

    async fn list(&self, filter: &ViewFilter) -> Result<Vec<E>, GatewayError>;

    fn joins(&self) -> bool {
        false
    }

    async fn related(&self, id: &str) -> Result<E::Related, GatewayError> {
        let _ = id;
        Ok(E::Related::default())
    }
}
