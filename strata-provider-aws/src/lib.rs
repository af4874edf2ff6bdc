//! Strata AWS Provider
//!
//! Resource and data source handlers for AWS services whose control planes
//! finish work asynchronously.
//!
//! ## Module Structure
//!
//! - `api` - Narrow remote API traits with Cloud Control and per-service SDK implementations
//! - `context` - Shared client, configuration and cancellation for handlers
//! - `flex` - Attribute/model conversion helpers
//! - `resources` - Managed resource handlers
//! - `data_sources` - Read-only data source handlers
//! - `provider` - AwsProvider implementation

pub mod api;
pub mod context;
pub mod data_sources;
pub mod flex;
pub mod provider;
pub mod resources;

// Re-export main types
pub use context::ServiceContext;
pub use provider::AwsProvider;

use strata_core::provider::{BoxFuture, Provider, ProviderResult};
use strata_core::registry::{RegistryError, ResourceRegistry};
use strata_core::resource::{Resource, ResourceId, State};
use strata_core::schema::ResourceSchema;

use data_sources::{geofence_collection, global_network, lifecycle_policy, search};
use resources::{cluster_activity_stream, knowledge_base, neptune_cluster, queue_attribute};
use resources::queue_attribute::QueueAttribute;

/// Every resource and data source type this provider supports
pub fn registry() -> Result<ResourceRegistry<ServiceContext>, RegistryError> {
    let mut registry = ResourceRegistry::new();

    registry.register_resource(knowledge_base::RESOURCE_TYPE, knowledge_base::factory)?;
    registry.register_resource(neptune_cluster::RESOURCE_TYPE, neptune_cluster::factory)?;
    registry.register_resource(
        cluster_activity_stream::RESOURCE_TYPE,
        cluster_activity_stream::factory,
    )?;
    registry.register_resource(
        QueueAttribute::Policy.resource_type(),
        queue_attribute::policy_factory,
    )?;
    registry.register_resource(
        QueueAttribute::RedrivePolicy.resource_type(),
        queue_attribute::redrive_policy_factory,
    )?;
    registry.register_resource(
        QueueAttribute::RedriveAllowPolicy.resource_type(),
        queue_attribute::redrive_allow_policy_factory,
    )?;

    registry.register_data_source(global_network::RESOURCE_TYPE, global_network::factory)?;
    registry.register_data_source(
        geofence_collection::RESOURCE_TYPE,
        geofence_collection::factory,
    )?;
    registry.register_data_source(lifecycle_policy::RESOURCE_TYPE, lifecycle_policy::factory)?;
    registry.register_data_source(search::RESOURCE_TYPE, search::factory)?;

    Ok(registry)
}

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        AwsProvider::schemas(self)
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        self.validate_resource(resource)
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { AwsProvider::read_data_source(self, &resource).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&from, &to).await })
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let state = state.clone();
        Box::pin(async move { self.delete_resource(&state).await })
    }
}
