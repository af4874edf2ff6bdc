//! AWS provider implementation
//!
//! Routes every framework call to the handler registered for the resource
//! type, resolving timeouts and attaching resource context to errors.

use std::sync::Arc;

use log::debug;
use strata_core::config::{ProviderConfig, Timeouts};
use strata_core::provider::{ProviderError, ProviderResult, ResourceHandler};
use strata_core::registry::Handlers;
use strata_core::resource::{Resource, ResourceId, State};
use strata_core::schema::ResourceSchema;
use tokio_util::sync::CancellationToken;

use crate::api::{AwsServiceApi, CloudApi, CloudControlApi, ServiceApi, load_sdk_config};
use crate::context::ServiceContext;

/// AWS Provider
pub struct AwsProvider {
    ctx: ServiceContext,
    handlers: Handlers,
}

impl AwsProvider {
    /// Create a provider talking to AWS in the configured region
    pub async fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let sdk_config = load_sdk_config(&config.region).await;
        let api = CloudControlApi::new(&sdk_config);
        let services = AwsServiceApi::new(&sdk_config);
        Self::with_api(Arc::new(api), Arc::new(services), config)
    }

    /// Create a provider on top of any [`CloudApi`] and [`ServiceApi`] implementations
    pub fn with_api(
        api: Arc<dyn CloudApi>,
        services: Arc<dyn ServiceApi>,
        config: ProviderConfig,
    ) -> ProviderResult<Self> {
        let registry = crate::registry()
            .map_err(|e| ProviderError::new(format!("invalid handler registry: {}", e)))?;
        let ctx = ServiceContext::new(api, services, config);
        let handlers = registry.instantiate(&ctx);
        Ok(Self { ctx, handlers })
    }

    pub fn region(&self) -> &str {
        &self.ctx.config.region
    }

    /// Cancelling this token aborts every in-flight wait and retry
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    pub fn schemas(&self) -> Vec<ResourceSchema> {
        self.handlers.schemas()
    }

    fn timeouts(&self, handler: &dyn ResourceHandler, resource: &Resource) -> ProviderResult<Timeouts> {
        self.ctx
            .timeouts(
                handler.resource_type(),
                handler.default_timeouts(),
                &resource.attributes,
            )
            .map_err(|e| e.for_resource(resource.id.clone()))
    }

    /// Schema checks and handler-specific checks, before any remote call
    pub fn validate_resource(&self, resource: &Resource) -> ProviderResult<()> {
        let resource_type = resource.id.resource_type.as_str();
        let result = if resource.is_data_source() {
            let handler = self.handlers.data_source(resource_type)?;
            handler
                .schema()
                .validate(&resource.attributes)
                .map_err(ProviderError::from)
        } else {
            let handler = self.handlers.resource(resource_type)?;
            handler
                .schema()
                .validate(&resource.attributes)
                .map_err(ProviderError::from)
                .and_then(|()| handler.validate(resource))
        };
        result.map_err(|e| e.for_resource(resource.id.clone()))
    }

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = self.handlers.resource(&id.resource_type)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };
        debug!("reading {} ({})", id, identifier);
        handler
            .read(id, identifier)
            .await
            .map_err(|e| with_context(e, id, Some(identifier)))
    }

    pub async fn read_data_source(&self, resource: &Resource) -> ProviderResult<State> {
        let handler = self.handlers.data_source(&resource.id.resource_type)?;
        self.validate_resource(resource)?;
        handler
            .read(resource)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let handler = self.handlers.resource(&resource.id.resource_type)?;
        self.validate_resource(resource)?;
        let timeouts = self.timeouts(handler, resource)?;

        debug!("creating {} (timeout {:?})", resource.id, timeouts.create);
        let state = handler
            .create(resource, &timeouts)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        debug!(
            "created {} ({})",
            resource.id,
            state.identifier.as_deref().unwrap_or_default()
        );
        Ok(keep_timeouts(state, resource))
    }

    pub async fn update_resource(&self, from: &State, to: &Resource) -> ProviderResult<State> {
        let handler = self.handlers.resource(&to.id.resource_type)?;
        self.validate_resource(to)?;
        let timeouts = self.timeouts(handler, to)?;

        debug!("updating {} (timeout {:?})", to.id, timeouts.update);
        let state = handler
            .update(from, to, &timeouts)
            .await
            .map_err(|e| with_context(e, &to.id, from.identifier.as_deref()))?;
        Ok(keep_timeouts(state, to))
    }

    /// Delete timeouts come from configuration and the `timeouts` attribute
    /// recorded in state
    pub async fn delete_resource(&self, state: &State) -> ProviderResult<()> {
        let handler = self.handlers.resource(&state.id.resource_type)?;
        let timeouts = self
            .ctx
            .timeouts(
                handler.resource_type(),
                handler.default_timeouts(),
                &state.attributes,
            )
            .map_err(|e| e.for_resource(state.id.clone()))?;

        debug!("deleting {} (timeout {:?})", state.id, timeouts.delete);
        handler
            .delete(state, &timeouts)
            .await
            .map_err(|e| with_context(e, &state.id, state.identifier.as_deref()))
    }
}

fn with_context(err: ProviderError, id: &ResourceId, identifier: Option<&str>) -> ProviderError {
    let err = err.for_resource(id.clone());
    match identifier {
        Some(identifier) => err.with_identifier(identifier),
        None => err,
    }
}

/// Carry the configured `timeouts` attribute into state so delete can honor it
fn keep_timeouts(mut state: State, resource: &Resource) -> State {
    if let Some(timeouts) = resource.attributes.get("timeouts") {
        state
            .attributes
            .insert("timeouts".to_string(), timeouts.clone());
    }
    state
}
