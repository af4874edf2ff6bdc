//! Read-only data source handlers

pub mod geofence_collection;
pub mod global_network;
pub mod lifecycle_policy;
pub mod search;

use strata_core::provider::{ProviderError, ProviderResult};

use crate::context::ServiceContext;

/// Fetch one remote object; a data source that finds nothing is an error
pub(crate) async fn lookup(
    ctx: &ServiceContext,
    type_name: &str,
    identifier: &str,
    description: &str,
) -> ProviderResult<serde_json::Value> {
    match ctx.api.get_resource(type_name, identifier).await {
        Ok(Some(desc)) => Ok(desc.properties),
        Ok(None) => Err(ProviderError::not_found(format!(
            "reading {} ({}): not found",
            description, identifier
        ))
        .with_identifier(identifier)),
        Err(e) => Err(ProviderError::from(e)
            .context(format!("reading {} ({})", description, identifier))
            .with_identifier(identifier)),
    }
}
