//! location_geofence_collection data source

use async_trait::async_trait;
use serde::Deserialize;
use strata_core::provider::{DataSourceHandler, ProviderResult};
use strata_core::resource::{Resource, State};
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator, types};

use super::lookup;
use crate::context::ServiceContext;
use crate::flex::{
    AttributeReader, AttributeWriter, Tag, from_properties, normalize_rfc3339, parse_tags,
};

pub const RESOURCE_TYPE: &str = "location_geofence_collection";
const TYPE_NAME: &str = "AWS::Location::GeofenceCollection";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GeofenceCollection {
    collection_name: String,
    collection_arn: Option<String>,
    create_time: Option<String>,
    description: Option<String>,
    kms_key_id: Option<String>,
    update_time: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

pub struct GeofenceCollectionDataSource {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn DataSourceHandler> {
    Box::new(GeofenceCollectionDataSource { ctx: ctx.clone() })
}

#[async_trait]
impl DataSourceHandler for GeofenceCollectionDataSource {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Look up an Amazon Location geofence collection by name")
            .attribute(
                AttributeSchema::new("collection_name", AttributeType::String)
                    .required()
                    .with_validator(Validator::LengthBetween(1, 100)),
            )
            .attribute(AttributeSchema::new("collection_arn", AttributeType::String).computed())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("kms_key_id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("update_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("tags", types::tags()).optional_computed())
    }

    async fn read(&self, config: &Resource) -> ProviderResult<State> {
        let id = config.id.clone();
        let name = AttributeReader::new(&config.attributes).required_string("collection_name")?;

        let properties = lookup(&self.ctx, TYPE_NAME, &name, "Location Geofence Collection")
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        let collection: GeofenceCollection = from_properties(TYPE_NAME, properties)?;

        let tags = parse_tags(&collection.tags);
        let attributes = AttributeWriter::new()
            .string("collection_name", Some(collection.collection_name.clone()))
            .string("collection_arn", collection.collection_arn)
            .string(
                "create_time",
                collection.create_time.as_deref().and_then(normalize_rfc3339),
            )
            .string("description", collection.description)
            .string("kms_key_id", collection.kms_key_id)
            .string(
                "update_time",
                collection.update_time.as_deref().and_then(normalize_rfc3339),
            )
            .string_map("tags", Some(&tags))
            .finish();
        Ok(State::existing(id, attributes).with_identifier(collection.collection_name))
    }
}
