//! opensearchserverless_lifecycle_policy data source

use async_trait::async_trait;
use serde::Deserialize;
use strata_core::provider::{DataSourceHandler, ProviderResult};
use strata_core::resource::{Resource, State};
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator};

use super::lookup;
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter, epoch_millis_to_rfc3339, from_properties};

pub const RESOURCE_TYPE: &str = "opensearchserverless_lifecycle_policy";
const TYPE_NAME: &str = "AWS::OpenSearchServerless::LifecyclePolicy";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LifecyclePolicy {
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    description: Option<String>,
    /// Either an encoded string or an inline document
    policy: Option<serde_json::Value>,
    policy_version: Option<String>,
    created_date: Option<i64>,
    last_modified_date: Option<i64>,
}

impl LifecyclePolicy {
    fn policy_text(&self) -> Option<String> {
        match self.policy.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

pub struct LifecyclePolicyDataSource {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn DataSourceHandler> {
    Box::new(LifecyclePolicyDataSource { ctx: ctx.clone() })
}

#[async_trait]
impl DataSourceHandler for LifecyclePolicyDataSource {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Look up an OpenSearch Serverless lifecycle policy")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .with_validator(Validator::LengthBetween(3, 32)),
            )
            .attribute(
                AttributeSchema::new("type", AttributeType::Enum(vec!["retention".to_string()]))
                    .required()
                    .with_description("Type of lifecycle policy. Must be `retention`."),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("created_date", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("last_modified_date", AttributeType::String).computed())
            .attribute(AttributeSchema::new("policy", AttributeType::String).computed())
            .attribute(AttributeSchema::new("policy_version", AttributeType::String).computed())
    }

    async fn read(&self, config: &Resource) -> ProviderResult<State> {
        let id = config.id.clone();
        let reader = AttributeReader::new(&config.attributes);
        let name = reader.required_string("name")?;
        let kind = reader.required_string("type")?;

        // Policies are keyed by type and name together
        let identifier = format!("{}|{}", kind, name);
        let properties = lookup(
            &self.ctx,
            TYPE_NAME,
            &identifier,
            "OpenSearch Serverless Lifecycle Policy",
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))?;
        let policy: LifecyclePolicy = from_properties(TYPE_NAME, properties)?;

        let attributes = AttributeWriter::new()
            .string("id", Some(policy.name.clone()))
            .string("name", Some(policy.name.clone()))
            .string("type", Some(policy.kind.clone()))
            .string("description", policy.description.clone())
            .string("policy", policy.policy_text())
            .string("policy_version", policy.policy_version.clone())
            .string(
                "created_date",
                epoch_millis_to_rfc3339(policy.created_date.unwrap_or(0)),
            )
            .string(
                "last_modified_date",
                epoch_millis_to_rfc3339(policy.last_modified_date.unwrap_or(0)),
            )
            .finish();
        Ok(State::existing(id, attributes).with_identifier(policy.name))
    }
}
