//! Managed resource handlers

pub mod cluster_activity_stream;
pub mod knowledge_base;
pub mod neptune_cluster;
pub mod queue_attribute;

use strata_core::provider::{ProviderError, ProviderResult};
use strata_core::resource::State;

/// Remote identifier of an existing resource
pub(crate) fn require_identifier(state: &State) -> ProviderResult<&str> {
    state.identifier.as_deref().ok_or_else(|| {
        ProviderError::validation("resource has no identifier; it was never created")
            .for_resource(state.id.clone())
    })
}
