//! resourceexplorer2_search data source
//!
//! Runs a Resource Explorer query and collects every page of results.

use async_trait::async_trait;
use log::debug;
use strata_core::provider::{DataSourceHandler, ProviderError, ProviderResult};
use strata_core::resource::{Resource, State, Value};
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator, types};

use crate::api::{FoundResource, ResourceCount};
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter};

pub const RESOURCE_TYPE: &str = "resourceexplorer2_search";

/// Page-level fields; only the first non-empty page's values are kept
#[derive(Debug, Clone, Default)]
struct PageMetadata {
    count: Option<ResourceCount>,
    view_arn: Option<String>,
}

fn flatten_resource(found: FoundResource) -> Value {
    let properties = found
        .properties
        .into_iter()
        .map(|p| {
            Value::Map(
                AttributeWriter::new()
                    .string("data", p.data.map(|d| d.to_string()))
                    .string("last_reported_at", p.last_reported_at)
                    .string("name", p.name)
                    .finish(),
            )
        })
        .collect();

    Value::Map(
        AttributeWriter::new()
            .string("arn", found.arn)
            .string("last_reported_at", found.last_reported_at)
            .string("owning_account_id", found.owning_account_id)
            .value("properties", Some(Value::List(properties)))
            .string("region", found.region)
            .string("resource_type", found.resource_type)
            .string("service", found.service)
            .finish(),
    )
}

/// Data source ID: view ARN and query joined by a comma (empty view when unset)
fn search_id(view_arn: Option<&str>, query: &str) -> String {
    format!("{},{}", view_arn.unwrap_or_default(), query)
}

pub struct SearchDataSource {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn DataSourceHandler> {
    Box::new(SearchDataSource { ctx: ctx.clone() })
}

#[async_trait]
impl DataSourceHandler for SearchDataSource {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Search for resources with AWS Resource Explorer")
            .attribute(AttributeSchema::new("query_string", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("view_arn", types::arn())
                    .optional_computed()
                    .with_validator(Validator::LengthBetween(0, 1011)),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "resource_count",
                    AttributeType::List(Box::new(AttributeType::Map(Box::new(
                        AttributeType::String,
                    )))),
                )
                .computed(),
            )
            .attribute(
                AttributeSchema::new(
                    "resources",
                    AttributeType::List(Box::new(AttributeType::Map(Box::new(
                        AttributeType::String,
                    )))),
                )
                .computed(),
            )
    }

    async fn read(&self, config: &Resource) -> ProviderResult<State> {
        let id = config.id.clone();
        let reader = AttributeReader::new(&config.attributes);
        let query = reader.required_string("query_string")?;
        let view_arn = reader.string("view_arn");
        let search_id = search_id(view_arn.as_deref(), &query);

        let mut resources = Vec::new();
        let mut metadata: Option<PageMetadata> = None;
        let mut next_token = None;
        let mut pages = 0u32;
        loop {
            let page = self
                .ctx
                .services
                .search(&query, view_arn.as_deref(), next_token.take())
                .await
                .map_err(|e| {
                    ProviderError::from(e)
                        .context(format!("reading Resource Explorer Search ({})", search_id))
                        .for_resource(id.clone())
                })?;
            pages += 1;

            if !page.resources.is_empty() {
                if metadata.is_none() {
                    metadata = Some(PageMetadata {
                        count: page.count,
                        view_arn: page.view_arn,
                    });
                }
                resources.extend(page.resources.into_iter().map(flatten_resource));
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        debug!(
            "Resource Explorer search '{}' returned {} resources over {} pages",
            search_id,
            resources.len(),
            pages
        );

        let metadata = metadata.unwrap_or_default();
        let resource_count = metadata
            .count
            .map(|count| {
                Value::List(vec![Value::Map(
                    AttributeWriter::new()
                        .bool("complete", Some(count.complete))
                        .int("total_resources", Some(count.total_resources))
                        .finish(),
                )])
            })
            .unwrap_or(Value::List(Vec::new()));

        let attributes = AttributeWriter::new()
            .string("id", Some(search_id.clone()))
            .string("query_string", Some(query))
            .string("view_arn", metadata.view_arn.or(view_arn))
            .value("resource_count", Some(resource_count))
            .value("resources", Some(Value::List(resources)))
            .finish();
        Ok(State::existing(id, attributes).with_identifier(search_id))
    }
}
