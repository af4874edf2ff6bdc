//! bedrockagent_knowledge_base resource

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strata_core::config::Timeouts;
use strata_core::differ;
use strata_core::provider::{ProviderError, ProviderResult, ResourceHandler};
use strata_core::resource::{Resource, ResourceId, State, Value};
use strata_core::retry::RetryableMessage;
use strata_core::schema::{
    AttributeSchema, AttributeType, BlockSchema, ResourceSchema, Validator, types,
};
use strata_core::waiter::Observation;

use super::require_identifier;
use crate::api::PatchOperation;
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter, from_properties, to_properties};

pub const RESOURCE_TYPE: &str = "bedrockagent_knowledge_base";
const TYPE_NAME: &str = "AWS::Bedrock::KnowledgeBase";

/// Attributes whose change triggers an UpdateKnowledgeBase call
const UPDATABLE: &[&str] = &["name", "description", "role_arn"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeBaseStatus {
    Creating,
    Active,
    Deleting,
    Updating,
    Failed,
    DeleteUnsuccessful,
    Other(String),
}

impl KnowledgeBaseStatus {
    fn parse(s: &str) -> Self {
        match s {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "DELETING" => Self::Deleting,
            "UPDATING" => Self::Updating,
            "FAILED" => Self::Failed,
            "DELETE_UNSUCCESSFUL" => Self::DeleteUnsuccessful,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for KnowledgeBaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Deleting => "DELETING",
            Self::Updating => "UPDATING",
            Self::Failed => "FAILED",
            Self::DeleteUnsuccessful => "DELETE_UNSUCCESSFUL",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

// Wire model

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KnowledgeBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_arn: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub role_arn: String,
    pub knowledge_base_configuration: KnowledgeBaseConfiguration,
    pub storage_configuration: StorageConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KnowledgeBaseConfiguration {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_knowledge_base_configuration: Option<VectorKnowledgeBaseConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VectorKnowledgeBaseConfiguration {
    pub embedding_model_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model_configuration: Option<EmbeddingModelConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplemental_data_storage_configuration: Option<SupplementalDataStorageConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbeddingModelConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrock_embedding_model_configuration: Option<BedrockEmbeddingModelConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BedrockEmbeddingModelConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_data_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SupplementalDataStorageConfiguration {
    #[serde(default)]
    pub supplemental_data_storage_locations: Vec<SupplementalDataStorageLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SupplementalDataStorageLocation {
    pub supplemental_data_storage_location_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_location: Option<S3Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Location {
    #[serde(rename = "URI")]
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageConfiguration {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opensearch_serverless_configuration: Option<OpenSearchServerlessConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinecone_configuration: Option<PineconeConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rds_configuration: Option<RdsConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_enterprise_cloud_configuration: Option<RedisEnterpriseCloudConfiguration>,
}

/// Field mapping shared by every vector store; stores ignore fields they lack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_field: Option<String>,
    pub text_field: String,
    pub metadata_field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenSearchServerlessConfiguration {
    pub collection_arn: String,
    pub vector_index_name: String,
    pub field_mapping: FieldMapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PineconeConfiguration {
    pub connection_string: String,
    pub credentials_secret_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub field_mapping: FieldMapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RdsConfiguration {
    pub resource_arn: String,
    pub credentials_secret_arn: String,
    pub database_name: String,
    pub table_name: String,
    pub field_mapping: FieldMapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedisEnterpriseCloudConfiguration {
    pub endpoint: String,
    pub credentials_secret_arn: String,
    pub vector_index_name: String,
    pub field_mapping: FieldMapping,
}

// Schema

fn replace_string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
        .required()
        .requires_replace()
}

fn field_mapping_block(primary_key: bool, vector: bool) -> AttributeType {
    let mut block = BlockSchema::new()
        .attribute(replace_string("metadata_field"))
        .attribute(replace_string("text_field"));
    if primary_key {
        block = block.attribute(replace_string("primary_key_field"));
    }
    if vector {
        block = block.attribute(replace_string("vector_field"));
    }
    block.at_most_one().into_type()
}

pub fn schema() -> ResourceSchema {
    let supplemental_storage = BlockSchema::new()
        .attribute(
            AttributeSchema::new(
                "storage_location",
                BlockSchema::new()
                    .attribute(
                        AttributeSchema::new("type", AttributeType::Enum(vec!["S3".to_string()]))
                            .required(),
                    )
                    .attribute(AttributeSchema::new(
                        "s3_location",
                        BlockSchema::new()
                            .attribute(
                                AttributeSchema::new("uri", AttributeType::String)
                                    .required()
                                    .with_validator(Validator::Matches {
                                        pattern: r"^s3://[a-z0-9.-]+(/.*)?$",
                                        message: "must be a valid S3 URI",
                                    }),
                            )
                            .at_most_one()
                            .into_type(),
                    ))
                    .into_type(),
            )
            .requires_replace(),
        )
        .at_most_one();

    let embedding_model = BlockSchema::new()
        .attribute(AttributeSchema::new(
            "bedrock_embedding_model_configuration",
            BlockSchema::new()
                .attribute(AttributeSchema::new("dimensions", types::positive_int()))
                .attribute(AttributeSchema::new(
                    "embedding_data_type",
                    AttributeType::Enum(vec!["FLOAT32".to_string(), "BINARY".to_string()]),
                ))
                .at_most_one()
                .into_type(),
        ))
        .at_most_one();

    let vector_configuration = BlockSchema::new()
        .attribute(
            AttributeSchema::new("embedding_model_arn", types::arn())
                .required()
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new("embedding_model_configuration", embedding_model.into_type())
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new(
                "supplemental_data_storage_configuration",
                supplemental_storage.into_type(),
            )
            .requires_replace(),
        )
        .at_most_one();

    let knowledge_base_configuration = BlockSchema::new()
        .attribute(
            AttributeSchema::new("type", AttributeType::Enum(vec!["VECTOR".to_string()]))
                .required()
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new(
                "vector_knowledge_base_configuration",
                vector_configuration.into_type(),
            )
            .requires_replace(),
        )
        .single();

    let storage_configuration = BlockSchema::new()
        .attribute(
            AttributeSchema::new(
                "type",
                AttributeType::Enum(
                    ["OPENSEARCH_SERVERLESS", "PINECONE", "RDS", "REDIS_ENTERPRISE_CLOUD"]
                        .map(String::from)
                        .to_vec(),
                ),
            )
            .required()
            .requires_replace(),
        )
        .attribute(AttributeSchema::new(
            "opensearch_serverless_configuration",
            BlockSchema::new()
                .attribute(AttributeSchema::new("collection_arn", types::arn()).required())
                .attribute(replace_string("vector_index_name"))
                .attribute(AttributeSchema::new(
                    "field_mapping",
                    field_mapping_block(false, true),
                ))
                .at_most_one()
                .into_type(),
        ))
        .attribute(AttributeSchema::new(
            "pinecone_configuration",
            BlockSchema::new()
                .attribute(replace_string("connection_string"))
                .attribute(AttributeSchema::new("credentials_secret_arn", types::arn()).required())
                .attribute(AttributeSchema::new("namespace", AttributeType::String))
                .attribute(AttributeSchema::new(
                    "field_mapping",
                    field_mapping_block(false, false),
                ))
                .at_most_one()
                .into_type(),
        ))
        .attribute(AttributeSchema::new(
            "rds_configuration",
            BlockSchema::new()
                .attribute(AttributeSchema::new("credentials_secret_arn", types::arn()).required())
                .attribute(replace_string("database_name"))
                .attribute(AttributeSchema::new("resource_arn", types::arn()).required())
                .attribute(replace_string("table_name"))
                .attribute(AttributeSchema::new(
                    "field_mapping",
                    field_mapping_block(true, true),
                ))
                .at_most_one()
                .into_type(),
        ))
        .attribute(AttributeSchema::new(
            "redis_enterprise_cloud_configuration",
            BlockSchema::new()
                .attribute(AttributeSchema::new("credentials_secret_arn", types::arn()).required())
                .attribute(replace_string("endpoint"))
                .attribute(replace_string("vector_index_name"))
                .attribute(AttributeSchema::new(
                    "field_mapping",
                    field_mapping_block(false, true),
                ))
                .at_most_one()
                .into_type(),
        ))
        .single();

    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Bedrock Agents knowledge base backed by a vector store")
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .with_validator(Validator::LengthBetween(1, 200)),
        )
        .attribute(AttributeSchema::new("role_arn", types::arn()).required())
        .attribute(
            AttributeSchema::new(
                "knowledge_base_configuration",
                knowledge_base_configuration.into_type(),
            )
            .required()
            .requires_replace(),
        )
        .attribute(
            AttributeSchema::new("storage_configuration", storage_configuration.into_type())
                .required()
                .requires_replace(),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("created_at", AttributeType::String).computed())
        .attribute(AttributeSchema::new("updated_at", AttributeType::String).computed())
        .attribute(
            AttributeSchema::new(
                "failure_reasons",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .computed(),
        )
}

// Expand / flatten

fn expand_field_mapping(block: Option<AttributeReader<'_>>) -> ProviderResult<FieldMapping> {
    let Some(block) = block else {
        return Err(ProviderError::validation(
            "Required block 'field_mapping' is missing",
        ));
    };
    Ok(FieldMapping {
        primary_key_field: block.string("primary_key_field"),
        vector_field: block.string("vector_field"),
        text_field: block.required_string("text_field")?,
        metadata_field: block.required_string("metadata_field")?,
    })
}

fn expand_knowledge_base_configuration(
    block: AttributeReader<'_>,
) -> ProviderResult<KnowledgeBaseConfiguration> {
    let vector = match block.block("vector_knowledge_base_configuration") {
        Some(vector) => {
            let embedding = vector
                .block("embedding_model_configuration")
                .and_then(|b| b.block("bedrock_embedding_model_configuration"))
                .map(|b| EmbeddingModelConfiguration {
                    bedrock_embedding_model_configuration: Some(
                        BedrockEmbeddingModelConfiguration {
                            dimensions: b.int("dimensions"),
                            embedding_data_type: b.string("embedding_data_type"),
                        },
                    ),
                });
            let supplemental = match vector
                .block("supplemental_data_storage_configuration")
                .and_then(|b| b.block("storage_location"))
            {
                Some(location) => Some(SupplementalDataStorageConfiguration {
                    supplemental_data_storage_locations: vec![SupplementalDataStorageLocation {
                        supplemental_data_storage_location_type: location
                            .required_string("type")?,
                        s3_location: match location.block("s3_location") {
                            Some(s3) => Some(S3Location {
                                uri: s3.required_string("uri")?,
                            }),
                            None => None,
                        },
                    }],
                }),
                None => None,
            };
            Some(VectorKnowledgeBaseConfiguration {
                embedding_model_arn: vector.required_string("embedding_model_arn")?,
                embedding_model_configuration: embedding,
                supplemental_data_storage_configuration: supplemental,
            })
        }
        None => None,
    };

    Ok(KnowledgeBaseConfiguration {
        kind: block.required_string("type")?,
        vector_knowledge_base_configuration: vector,
    })
}

fn expand_storage_configuration(
    block: AttributeReader<'_>,
) -> ProviderResult<StorageConfiguration> {
    let mut storage = StorageConfiguration {
        kind: block.required_string("type")?,
        ..Default::default()
    };

    if let Some(b) = block.block("opensearch_serverless_configuration") {
        storage.opensearch_serverless_configuration = Some(OpenSearchServerlessConfiguration {
            collection_arn: b.required_string("collection_arn")?,
            vector_index_name: b.required_string("vector_index_name")?,
            field_mapping: expand_field_mapping(b.block("field_mapping"))?,
        });
    }
    if let Some(b) = block.block("pinecone_configuration") {
        storage.pinecone_configuration = Some(PineconeConfiguration {
            connection_string: b.required_string("connection_string")?,
            credentials_secret_arn: b.required_string("credentials_secret_arn")?,
            namespace: b.string("namespace"),
            field_mapping: expand_field_mapping(b.block("field_mapping"))?,
        });
    }
    if let Some(b) = block.block("rds_configuration") {
        storage.rds_configuration = Some(RdsConfiguration {
            resource_arn: b.required_string("resource_arn")?,
            credentials_secret_arn: b.required_string("credentials_secret_arn")?,
            database_name: b.required_string("database_name")?,
            table_name: b.required_string("table_name")?,
            field_mapping: expand_field_mapping(b.block("field_mapping"))?,
        });
    }
    if let Some(b) = block.block("redis_enterprise_cloud_configuration") {
        storage.redis_enterprise_cloud_configuration = Some(RedisEnterpriseCloudConfiguration {
            endpoint: b.required_string("endpoint")?,
            credentials_secret_arn: b.required_string("credentials_secret_arn")?,
            vector_index_name: b.required_string("vector_index_name")?,
            field_mapping: expand_field_mapping(b.block("field_mapping"))?,
        });
    }

    Ok(storage)
}

pub fn expand(attributes: &HashMap<String, Value>) -> ProviderResult<KnowledgeBase> {
    let reader = AttributeReader::new(attributes);
    Ok(KnowledgeBase {
        name: reader.required_string("name")?,
        description: reader.string("description"),
        role_arn: reader.required_string("role_arn")?,
        knowledge_base_configuration: expand_knowledge_base_configuration(
            reader.required_block("knowledge_base_configuration")?,
        )?,
        storage_configuration: expand_storage_configuration(
            reader.required_block("storage_configuration")?,
        )?,
        tags: reader.string_map("tags"),
        ..Default::default()
    })
}

fn flatten_field_mapping(mapping: &FieldMapping) -> AttributeWriter {
    AttributeWriter::new()
        .string("primary_key_field", mapping.primary_key_field.clone())
        .string("vector_field", mapping.vector_field.clone())
        .string("text_field", Some(mapping.text_field.clone()))
        .string("metadata_field", Some(mapping.metadata_field.clone()))
}

fn flatten_storage_configuration(storage: &StorageConfiguration) -> AttributeWriter {
    AttributeWriter::new()
        .string("type", Some(storage.kind.clone()))
        .block(
            "opensearch_serverless_configuration",
            storage.opensearch_serverless_configuration.as_ref().map(|c| {
                AttributeWriter::new()
                    .string("collection_arn", Some(c.collection_arn.clone()))
                    .string("vector_index_name", Some(c.vector_index_name.clone()))
                    .block("field_mapping", Some(flatten_field_mapping(&c.field_mapping)))
            }),
        )
        .block(
            "pinecone_configuration",
            storage.pinecone_configuration.as_ref().map(|c| {
                AttributeWriter::new()
                    .string("connection_string", Some(c.connection_string.clone()))
                    .string("credentials_secret_arn", Some(c.credentials_secret_arn.clone()))
                    .string("namespace", c.namespace.clone())
                    .block("field_mapping", Some(flatten_field_mapping(&c.field_mapping)))
            }),
        )
        .block(
            "rds_configuration",
            storage.rds_configuration.as_ref().map(|c| {
                AttributeWriter::new()
                    .string("resource_arn", Some(c.resource_arn.clone()))
                    .string("credentials_secret_arn", Some(c.credentials_secret_arn.clone()))
                    .string("database_name", Some(c.database_name.clone()))
                    .string("table_name", Some(c.table_name.clone()))
                    .block("field_mapping", Some(flatten_field_mapping(&c.field_mapping)))
            }),
        )
        .block(
            "redis_enterprise_cloud_configuration",
            storage.redis_enterprise_cloud_configuration.as_ref().map(|c| {
                AttributeWriter::new()
                    .string("endpoint", Some(c.endpoint.clone()))
                    .string("credentials_secret_arn", Some(c.credentials_secret_arn.clone()))
                    .string("vector_index_name", Some(c.vector_index_name.clone()))
                    .block("field_mapping", Some(flatten_field_mapping(&c.field_mapping)))
            }),
        )
}

fn flatten_knowledge_base_configuration(config: &KnowledgeBaseConfiguration) -> AttributeWriter {
    let vector = config.vector_knowledge_base_configuration.as_ref().map(|v| {
        let embedding = v
            .embedding_model_configuration
            .as_ref()
            .and_then(|e| e.bedrock_embedding_model_configuration.as_ref())
            .map(|b| {
                AttributeWriter::new().block(
                    "bedrock_embedding_model_configuration",
                    Some(
                        AttributeWriter::new()
                            .int("dimensions", b.dimensions)
                            .string("embedding_data_type", b.embedding_data_type.clone()),
                    ),
                )
            });
        let supplemental = v
            .supplemental_data_storage_configuration
            .as_ref()
            .and_then(|s| s.supplemental_data_storage_locations.first())
            .map(|location| {
                AttributeWriter::new().block(
                    "storage_location",
                    Some(
                        AttributeWriter::new()
                            .string(
                                "type",
                                Some(location.supplemental_data_storage_location_type.clone()),
                            )
                            .block(
                                "s3_location",
                                location.s3_location.as_ref().map(|s3| {
                                    AttributeWriter::new().string("uri", Some(s3.uri.clone()))
                                }),
                            ),
                    ),
                )
            });
        AttributeWriter::new()
            .string("embedding_model_arn", Some(v.embedding_model_arn.clone()))
            .block("embedding_model_configuration", embedding)
            .block("supplemental_data_storage_configuration", supplemental)
    });

    AttributeWriter::new()
        .string("type", Some(config.kind.clone()))
        .block("vector_knowledge_base_configuration", vector)
}

pub fn flatten(kb: &KnowledgeBase) -> HashMap<String, Value> {
    AttributeWriter::new()
        .string("id", kb.knowledge_base_id.clone())
        .string("arn", kb.knowledge_base_arn.clone())
        .string("name", Some(kb.name.clone()))
        .string("description", kb.description.clone())
        .string("role_arn", Some(kb.role_arn.clone()))
        .block(
            "knowledge_base_configuration",
            Some(flatten_knowledge_base_configuration(
                &kb.knowledge_base_configuration,
            )),
        )
        .block(
            "storage_configuration",
            Some(flatten_storage_configuration(&kb.storage_configuration)),
        )
        .string("created_at", kb.created_at.clone())
        .string("updated_at", kb.updated_at.clone())
        .strings("failure_reasons", &kb.failure_reasons)
        .string_map("tags", kb.tags.as_ref())
        .finish()
}

/// Error signatures of IAM and OpenSearch data-access propagation
fn create_retryable_messages() -> Vec<RetryableMessage> {
    vec![
        RetryableMessage::containing("cannot assume role"),
        RetryableMessage::containing("unable to assume the given role"),
        RetryableMessage::containing("storage configuration provided is invalid"),
    ]
}

// Handler

pub struct KnowledgeBaseHandler {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(KnowledgeBaseHandler { ctx: ctx.clone() })
}

impl KnowledgeBaseHandler {
    async fn find(&self, identifier: &str) -> ProviderResult<Option<KnowledgeBase>> {
        match self.ctx.api.get_resource(TYPE_NAME, identifier).await? {
            Some(desc) => Ok(Some(from_properties(TYPE_NAME, desc.properties)?)),
            None => Ok(None),
        }
    }

    async fn status(
        &self,
        identifier: &str,
    ) -> ProviderResult<Observation<KnowledgeBase, KnowledgeBaseStatus>> {
        Ok(match self.find(identifier).await? {
            Some(kb) => {
                let status = KnowledgeBaseStatus::parse(kb.status.as_deref().unwrap_or_default());
                Observation::found(kb, status)
            }
            None => Observation::NotFound,
        })
    }

    async fn wait_until_active(
        &self,
        pending: KnowledgeBaseStatus,
        identifier: &str,
        timeout: Duration,
        operation: &str,
    ) -> ProviderResult<KnowledgeBase> {
        self.ctx
            .waiter([pending], [KnowledgeBaseStatus::Active], timeout)
            .until_present(|| self.status(identifier))
            .await
            .map_err(|e| {
                ProviderError::from(e.with_failure_reasons(|kb| kb.failure_reasons.clone()))
                    .context(format!(
                        "waiting for Bedrock Agent Knowledge Base ({}) {}",
                        identifier, operation
                    ))
                    .with_identifier(identifier)
            })
    }

    fn state(id: ResourceId, identifier: &str, kb: &KnowledgeBase) -> State {
        State::existing(id, flatten(kb)).with_identifier(identifier)
    }
}

#[async_trait]
impl ResourceHandler for KnowledgeBaseHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(30 * 60))
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        match self.find(identifier).await {
            Ok(Some(kb)) => Ok(Self::state(id.clone(), identifier, &kb)),
            Ok(None) => {
                warn!(
                    "Bedrock Agent Knowledge Base ({}) not found, removing from state",
                    identifier
                );
                Ok(State::not_found(id.clone()))
            }
            Err(e) => Err(e
                .context(format!("reading Bedrock Agent Knowledge Base ({})", identifier))
                .for_resource(id.clone())),
        }
    }

    async fn create(&self, resource: &Resource, timeouts: &Timeouts) -> ProviderResult<State> {
        let id = resource.id.clone();
        let desired = to_properties(&expand(&resource.attributes)?)?;
        let messages = self
            .ctx
            .retryable_messages(RESOURCE_TYPE, &create_retryable_messages());

        debug!("creating Bedrock Agent Knowledge Base {}", id);
        let identifier = self
            .ctx
            .propagation_retrier()
            .retry_on(
                || {
                    let api = self.ctx.api.clone();
                    let desired = desired.clone();
                    async move {
                        api.create_resource(TYPE_NAME, desired)
                            .await
                            .map_err(ProviderError::from)
                    }
                },
                &messages,
            )
            .await
            .map_err(|e| {
                e.context("creating Bedrock Agent Knowledge Base")
                    .for_resource(id.clone())
            })?;

        let kb = self
            .wait_until_active(
                KnowledgeBaseStatus::Creating,
                &identifier,
                timeouts.create,
                "create",
            )
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        Ok(Self::state(id, &identifier, &kb))
    }

    async fn update(
        &self,
        from: &State,
        to: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let id = to.id.clone();
        let identifier = require_identifier(from)?;
        let changed = differ::update_changes(&schema(), from, to)?;
        let desired = expand(&to.attributes)?;

        if changed.iter().any(|c| c == "tags") {
            let tags = desired.tags.clone().unwrap_or_default();
            self.ctx
                .api
                .update_resource(
                    TYPE_NAME,
                    identifier,
                    vec![PatchOperation::replace("Tags", serde_json::json!(tags))],
                )
                .await
                .map_err(|e| {
                    ProviderError::from(e)
                        .context(format!(
                            "updating tags of Bedrock Agent Knowledge Base ({})",
                            identifier
                        ))
                        .for_resource(id.clone())
                })?;
        }

        if changed.iter().any(|c| UPDATABLE.contains(&c.as_str())) {
            let mut patch = vec![
                PatchOperation::replace("Name", serde_json::json!(desired.name)),
                PatchOperation::replace("RoleArn", serde_json::json!(desired.role_arn)),
            ];
            patch.push(match &desired.description {
                Some(description) => {
                    PatchOperation::replace("Description", serde_json::json!(description))
                }
                None => PatchOperation::remove("Description"),
            });
            let messages = self.ctx.retryable_messages(
                RESOURCE_TYPE,
                &[RetryableMessage::containing("cannot assume role")],
            );

            self.ctx
                .propagation_retrier()
                .retry_on(
                    || {
                        let api = self.ctx.api.clone();
                        let patch = patch.clone();
                        async move {
                            api.update_resource(TYPE_NAME, identifier, patch)
                                .await
                                .map_err(ProviderError::from)
                        }
                    },
                    &messages,
                )
                .await
                .map_err(|e| {
                    e.context(format!(
                        "updating Bedrock Agent Knowledge Base ({})",
                        identifier
                    ))
                    .for_resource(id.clone())
                })?;

            let kb = self
                .wait_until_active(
                    KnowledgeBaseStatus::Updating,
                    identifier,
                    timeouts.update,
                    "update",
                )
                .await
                .map_err(|e| e.for_resource(id.clone()))?;
            return Ok(Self::state(id, identifier, &kb));
        }

        self.read(&id, identifier).await
    }

    async fn delete(&self, state: &State, timeouts: &Timeouts) -> ProviderResult<()> {
        let id = state.id.clone();
        let identifier = require_identifier(state)?;

        debug!("deleting Bedrock Agent Knowledge Base ({})", identifier);
        match self.ctx.api.delete_resource(TYPE_NAME, identifier).await {
            Ok(()) => {}
            Err(e) => {
                let e = ProviderError::from(e);
                if e.is_not_found() {
                    return Ok(());
                }
                return Err(e
                    .context(format!(
                        "deleting Bedrock Agent Knowledge Base ({})",
                        identifier
                    ))
                    .for_resource(id));
            }
        }

        self.ctx
            .waiter(
                [KnowledgeBaseStatus::Active, KnowledgeBaseStatus::Deleting],
                [],
                timeouts.delete,
            )
            .wait(|| self.status(identifier))
            .await
            .map_err(|e| {
                ProviderError::from(e.with_failure_reasons(|kb| kb.failure_reasons.clone()))
                    .context(format!(
                        "waiting for Bedrock Agent Knowledge Base ({}) delete",
                        identifier
                    ))
                    .for_resource(id)
                    .with_identifier(identifier)
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string(s: &str) -> Value {
        Value::string(s)
    }

    fn block(entries: Vec<(&str, Value)>) -> Value {
        Value::List(vec![Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )])
    }

    fn rds_attributes() -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), string("docs")),
            (
                "role_arn".to_string(),
                string("arn:aws:iam::123456789012:role/kb"),
            ),
            (
                "knowledge_base_configuration".to_string(),
                block(vec![
                    ("type", string("VECTOR")),
                    (
                        "vector_knowledge_base_configuration",
                        block(vec![(
                            "embedding_model_arn",
                            string("arn:aws:bedrock:us-west-2::foundation-model/amazon.titan-embed-text-v2:0"),
                        )]),
                    ),
                ]),
            ),
            (
                "storage_configuration".to_string(),
                block(vec![
                    ("type", string("RDS")),
                    (
                        "rds_configuration",
                        block(vec![
                            (
                                "resource_arn",
                                string("arn:aws:rds:us-west-2:123456789012:cluster:kb"),
                            ),
                            (
                                "credentials_secret_arn",
                                string("arn:aws:secretsmanager:us-west-2:123456789012:secret:kb"),
                            ),
                            ("database_name", string("postgres")),
                            ("table_name", string("bedrock_integration.bedrock_kb")),
                            (
                                "field_mapping",
                                block(vec![
                                    ("primary_key_field", string("id")),
                                    ("vector_field", string("embedding")),
                                    ("text_field", string("chunks")),
                                    ("metadata_field", string("metadata")),
                                ]),
                            ),
                        ]),
                    ),
                ]),
            ),
        ])
    }

    #[test]
    fn schema_accepts_rds_configuration() {
        assert!(schema().validate(&rds_attributes()).is_ok());
    }

    #[test]
    fn schema_rejects_bad_supplemental_uri() {
        let mut attrs = rds_attributes();
        attrs.insert(
            "knowledge_base_configuration".to_string(),
            block(vec![
                ("type", string("VECTOR")),
                (
                    "vector_knowledge_base_configuration",
                    block(vec![
                        (
                            "embedding_model_arn",
                            string("arn:aws:bedrock:us-west-2::foundation-model/amazon.nova"),
                        ),
                        (
                            "supplemental_data_storage_configuration",
                            block(vec![(
                                "storage_location",
                                block(vec![
                                    ("type", string("S3")),
                                    ("s3_location", block(vec![("uri", string("bucket/x"))])),
                                ]),
                            )]),
                        ),
                    ]),
                ),
            ]),
        );
        let errors = schema().validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("must be a valid S3 URI"));
    }

    #[test]
    fn expand_builds_wire_shape() {
        let kb = expand(&rds_attributes()).unwrap();
        let json = to_properties(&kb).unwrap();
        assert_eq!(json["StorageConfiguration"]["Type"], json!("RDS"));
        assert_eq!(
            json["StorageConfiguration"]["RdsConfiguration"]["FieldMapping"]["PrimaryKeyField"],
            json!("id")
        );
        assert_eq!(json["KnowledgeBaseConfiguration"]["Type"], json!("VECTOR"));
        // Computed fields are never sent
        assert!(json.get("Status").is_none());
        assert!(json.get("FailureReasons").is_none());
    }

    #[test]
    fn flatten_restores_configured_attributes() {
        let attrs = rds_attributes();
        let flattened = flatten(&expand(&attrs).unwrap());
        for key in ["name", "role_arn", "knowledge_base_configuration", "storage_configuration"] {
            assert_eq!(flattened.get(key), attrs.get(key), "{}", key);
        }
    }

    #[test]
    fn missing_field_mapping_is_a_validation_error() {
        let mut attrs = rds_attributes();
        attrs.insert(
            "storage_configuration".to_string(),
            block(vec![
                ("type", string("OPENSEARCH_SERVERLESS")),
                (
                    "opensearch_serverless_configuration",
                    block(vec![
                        (
                            "collection_arn",
                            string("arn:aws:aoss:us-west-2:123456789012:collection/kb"),
                        ),
                        ("vector_index_name", string("index")),
                    ]),
                ),
            ]),
        );
        let err = expand(&attrs).unwrap_err();
        assert!(err.message.contains("field_mapping"));
    }

    #[test]
    fn status_parsing_keeps_unknown_values() {
        assert_eq!(KnowledgeBaseStatus::parse("ACTIVE"), KnowledgeBaseStatus::Active);
        assert_eq!(
            KnowledgeBaseStatus::parse("DELETE_UNSUCCESSFUL").to_string(),
            "DELETE_UNSUCCESSFUL"
        );
        assert_eq!(KnowledgeBaseStatus::parse("PAUSED").to_string(), "PAUSED");
    }
}
