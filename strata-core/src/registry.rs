//! Registry - Explicit table of handler factories
//!
//! A provider builds one [`ResourceRegistry`] listing every resource and data
//! source type it supports, then instantiates it against its service context.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::provider::{DataSourceHandler, ProviderError, ProviderResult, ResourceHandler};
use crate::schema::ResourceSchema;

/// Builds a resource handler from the provider's service context
pub type ResourceFactory<C> = fn(&C) -> Box<dyn ResourceHandler>;

/// Builds a data source handler from the provider's service context
pub type DataSourceFactory<C> = fn(&C) -> Box<dyn DataSourceHandler>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Resource type '{0}' is registered twice")]
    Duplicate(String),
}

pub struct ResourceRegistry<C> {
    resources: BTreeMap<&'static str, ResourceFactory<C>>,
    data_sources: BTreeMap<&'static str, DataSourceFactory<C>>,
}

impl<C> Default for ResourceRegistry<C> {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            data_sources: BTreeMap::new(),
        }
    }
}

impl<C> ResourceRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource(
        &mut self,
        resource_type: &'static str,
        factory: ResourceFactory<C>,
    ) -> Result<(), RegistryError> {
        if self.resources.contains_key(resource_type)
            || self.data_sources.contains_key(resource_type)
        {
            return Err(RegistryError::Duplicate(resource_type.to_string()));
        }
        self.resources.insert(resource_type, factory);
        Ok(())
    }

    pub fn register_data_source(
        &mut self,
        resource_type: &'static str,
        factory: DataSourceFactory<C>,
    ) -> Result<(), RegistryError> {
        if self.resources.contains_key(resource_type)
            || self.data_sources.contains_key(resource_type)
        {
            return Err(RegistryError::Duplicate(resource_type.to_string()));
        }
        self.data_sources.insert(resource_type, factory);
        Ok(())
    }

    /// Registered resource types, sorted
    pub fn resource_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resources.keys().copied()
    }

    /// Registered data source types, sorted
    pub fn data_source_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.data_sources.keys().copied()
    }

    /// Build every handler against `ctx`
    pub fn instantiate(&self, ctx: &C) -> Handlers {
        Handlers {
            resources: self
                .resources
                .iter()
                .map(|(name, factory)| (*name, factory(ctx)))
                .collect(),
            data_sources: self
                .data_sources
                .iter()
                .map(|(name, factory)| (*name, factory(ctx)))
                .collect(),
        }
    }
}

/// Instantiated handlers, keyed by resource type
pub struct Handlers {
    resources: BTreeMap<&'static str, Box<dyn ResourceHandler>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSourceHandler>>,
}

impl Handlers {
    pub fn resource(&self, resource_type: &str) -> ProviderResult<&dyn ResourceHandler> {
        self.resources
            .get(resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!("Unknown resource type: {}", resource_type))
            })
    }

    pub fn data_source(&self, resource_type: &str) -> ProviderResult<&dyn DataSourceHandler> {
        self.data_sources
            .get(resource_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!("Unknown data source type: {}", resource_type))
            })
    }

    pub fn schemas(&self) -> Vec<ResourceSchema> {
        self.resources
            .values()
            .map(|h| h.schema())
            .chain(self.data_sources.values().map(|h| h.schema()))
            .collect()
    }
}
