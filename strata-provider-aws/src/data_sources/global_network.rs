//! networkmanager_global_network data source

use async_trait::async_trait;
use serde::Deserialize;
use strata_core::provider::{DataSourceHandler, ProviderResult};
use strata_core::resource::{Resource, State};
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::lookup;
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter, Tag, from_properties, parse_tags};

pub const RESOURCE_TYPE: &str = "networkmanager_global_network";
const TYPE_NAME: &str = "AWS::NetworkManager::GlobalNetwork";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GlobalNetwork {
    id: String,
    arn: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

pub struct GlobalNetworkDataSource {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn DataSourceHandler> {
    Box::new(GlobalNetworkDataSource { ctx: ctx.clone() })
}

#[async_trait]
impl DataSourceHandler for GlobalNetworkDataSource {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Look up a Network Manager global network by ID")
            .attribute(AttributeSchema::new("global_network_id", AttributeType::String).required())
            .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("tags", types::tags()).computed())
    }

    async fn read(&self, config: &Resource) -> ProviderResult<State> {
        let id = config.id.clone();
        let network_id =
            AttributeReader::new(&config.attributes).required_string("global_network_id")?;

        let properties = lookup(&self.ctx, TYPE_NAME, &network_id, "Network Manager Global Network")
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        let network: GlobalNetwork = from_properties(TYPE_NAME, properties)?;

        let tags = parse_tags(&network.tags);
        let attributes = AttributeWriter::new()
            .string("global_network_id", Some(network.id.clone()))
            .string("arn", network.arn)
            .string("description", network.description)
            .string_map("tags", Some(&tags))
            .finish();
        Ok(State::existing(id, attributes).with_identifier(network.id))
    }
}
