//! neptune_cluster resource

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_core::config::Timeouts;
use strata_core::differ;
use strata_core::provider::{ProviderError, ProviderResult, ResourceHandler};
use strata_core::resource::{Resource, ResourceId, State, Value};
use strata_core::retry::RetryableMessage;
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator, types};
use strata_core::waiter::Observation;

use super::require_identifier;
use crate::api::PatchOperation;
use crate::context::ServiceContext;
use crate::flex::{
    AttributeReader, AttributeWriter, Tag, build_tags, from_properties, parse_tags, to_properties,
};

pub const RESOURCE_TYPE: &str = "neptune_cluster";
const TYPE_NAME: &str = "AWS::Neptune::DBCluster";

const DEFAULT_PORT: i64 = 8182;
const ENGINE: &str = "neptune";

/// Attributes kept only in local state; they never reach the cluster model
const LOCAL_ATTRIBUTES: &[&str] = &["skip_final_snapshot", "final_snapshot_identifier"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterStatus {
    Available,
    BackingUp,
    ConfiguringIamDatabaseAuth,
    Creating,
    Deleting,
    Migrating,
    Modifying,
    PreparingDataMigration,
    Renaming,
    ResettingMasterCredentials,
    Upgrading,
    Other(String),
}

impl ClusterStatus {
    fn parse(s: &str) -> Self {
        match s {
            "available" => Self::Available,
            "backing-up" => Self::BackingUp,
            "configuring-iam-database-auth" => Self::ConfiguringIamDatabaseAuth,
            "creating" => Self::Creating,
            "deleting" => Self::Deleting,
            "migrating" => Self::Migrating,
            "modifying" => Self::Modifying,
            "preparing-data-migration" => Self::PreparingDataMigration,
            "renaming" => Self::Renaming,
            "resetting-master-credentials" => Self::ResettingMasterCredentials,
            "upgrading" => Self::Upgrading,
            other => Self::Other(other.to_string()),
        }
    }

    fn create_pending() -> Vec<Self> {
        vec![
            Self::Creating,
            Self::BackingUp,
            Self::Modifying,
            Self::PreparingDataMigration,
            Self::Migrating,
        ]
    }

    fn update_pending() -> Vec<Self> {
        vec![
            Self::BackingUp,
            Self::ConfiguringIamDatabaseAuth,
            Self::Modifying,
            Self::Renaming,
            Self::ResettingMasterCredentials,
            Self::Upgrading,
        ]
    }

    fn delete_pending() -> Vec<Self> {
        vec![
            Self::Available,
            Self::Deleting,
            Self::BackingUp,
            Self::Modifying,
        ]
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::BackingUp => "backing-up",
            Self::ConfiguringIamDatabaseAuth => "configuring-iam-database-auth",
            Self::Creating => "creating",
            Self::Deleting => "deleting",
            Self::Migrating => "migrating",
            Self::Modifying => "modifying",
            Self::PreparingDataMigration => "preparing-data-migration",
            Self::Renaming => "renaming",
            Self::ResettingMasterCredentials => "resetting-master-credentials",
            Self::Upgrading => "upgrading",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NeptuneCluster {
    #[serde(rename = "DBClusterIdentifier")]
    pub db_cluster_identifier: String,
    #[serde(rename = "DBClusterArn", skip_serializing_if = "Option::is_none")]
    pub db_cluster_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_retention_period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_backup_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_maintenance_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iam_auth_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_protection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_encrypted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_tags_to_snapshot: Option<bool>,
    #[serde(rename = "DBSubnetGroupName", skip_serializing_if = "Option::is_none")]
    pub db_subnet_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpc_security_group_ids: Vec<String>,
    #[serde(rename = "DBPort", skip_serializing_if = "Option::is_none")]
    pub db_port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Amazon Neptune DB cluster")
        .attribute(
            AttributeSchema::new("cluster_identifier", AttributeType::String)
                .required()
                .requires_replace()
                .with_validator(Validator::LengthBetween(1, 63))
                .with_validator(Validator::Matches {
                    pattern: r"^[a-z][a-z0-9-]*$",
                    message: "must start with a lowercase letter and contain only lowercase alphanumeric characters and hyphens",
                }),
        )
        .attribute(
            AttributeSchema::new("engine", AttributeType::Enum(vec![ENGINE.to_string()]))
                .requires_replace()
                .with_default(Value::string(ENGINE)),
        )
        .attribute(AttributeSchema::new("engine_version", AttributeType::String).optional_computed())
        .attribute(
            AttributeSchema::new("backup_retention_period", types::positive_int())
                .with_default(Value::Int(1))
                .with_description("Days to retain automated backups"),
        )
        .attribute(
            AttributeSchema::new("preferred_backup_window", AttributeType::String)
                .optional_computed(),
        )
        .attribute(
            AttributeSchema::new("preferred_maintenance_window", AttributeType::String)
                .optional_computed(),
        )
        .attribute(AttributeSchema::new(
            "iam_database_authentication_enabled",
            AttributeType::Bool,
        ))
        .attribute(AttributeSchema::new("deletion_protection", AttributeType::Bool))
        .attribute(AttributeSchema::new("storage_encrypted", AttributeType::Bool).requires_replace())
        .attribute(AttributeSchema::new("kms_key_arn", types::arn()).requires_replace())
        .attribute(AttributeSchema::new("copy_tags_to_snapshot", AttributeType::Bool))
        .attribute(
            AttributeSchema::new("neptune_subnet_group_name", AttributeType::String)
                .optional_computed()
                .requires_replace(),
        )
        .attribute(AttributeSchema::new(
            "vpc_security_group_ids",
            AttributeType::List(Box::new(AttributeType::String)),
        ))
        .attribute(
            AttributeSchema::new("port", AttributeType::Int)
                .optional_computed()
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new("skip_final_snapshot", AttributeType::Bool)
                .with_default(Value::Bool(false)),
        )
        .attribute(
            AttributeSchema::new("final_snapshot_identifier", AttributeType::String)
                .with_validator(Validator::Matches {
                    pattern: r"^[A-Za-z][A-Za-z0-9]*(-[A-Za-z0-9]+)*$",
                    message: "must start with a letter, contain only alphanumerics and single hyphens, and not end with a hyphen",
                }),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
        .attribute(AttributeSchema::new("endpoint", AttributeType::String).computed())
        .attribute(AttributeSchema::new("reader_endpoint", AttributeType::String).computed())
        .attribute(AttributeSchema::new("cluster_resource_id", AttributeType::String).computed())
        .attribute(AttributeSchema::new("status", AttributeType::String).computed())
}

pub fn expand(attributes: &HashMap<String, Value>) -> ProviderResult<NeptuneCluster> {
    let reader = AttributeReader::new(attributes);
    Ok(NeptuneCluster {
        db_cluster_identifier: reader.required_string("cluster_identifier")?,
        engine_version: reader.string("engine_version"),
        backup_retention_period: Some(reader.int("backup_retention_period").unwrap_or(1)),
        preferred_backup_window: reader.string("preferred_backup_window"),
        preferred_maintenance_window: reader.string("preferred_maintenance_window"),
        iam_auth_enabled: reader.bool("iam_database_authentication_enabled"),
        deletion_protection: reader.bool("deletion_protection"),
        storage_encrypted: reader.bool("storage_encrypted"),
        kms_key_id: reader.string("kms_key_arn"),
        copy_tags_to_snapshot: reader.bool("copy_tags_to_snapshot"),
        db_subnet_group_name: reader.string("neptune_subnet_group_name"),
        vpc_security_group_ids: reader.strings("vpc_security_group_ids"),
        db_port: reader.int("port"),
        tags: reader
            .string_map("tags")
            .map(|tags| build_tags(&tags))
            .unwrap_or_default(),
        ..Default::default()
    })
}

pub fn flatten(cluster: &NeptuneCluster) -> HashMap<String, Value> {
    let tags = parse_tags(&cluster.tags);
    AttributeWriter::new()
        .string("cluster_identifier", Some(cluster.db_cluster_identifier.clone()))
        .string("engine", Some(ENGINE))
        .string("engine_version", cluster.engine_version.clone())
        .int("backup_retention_period", cluster.backup_retention_period)
        .string("preferred_backup_window", cluster.preferred_backup_window.clone())
        .string(
            "preferred_maintenance_window",
            cluster.preferred_maintenance_window.clone(),
        )
        .bool(
            "iam_database_authentication_enabled",
            Some(cluster.iam_auth_enabled.unwrap_or(false)),
        )
        .bool(
            "deletion_protection",
            Some(cluster.deletion_protection.unwrap_or(false)),
        )
        .bool(
            "storage_encrypted",
            Some(cluster.storage_encrypted.unwrap_or(false)),
        )
        .string("kms_key_arn", cluster.kms_key_id.clone())
        .bool(
            "copy_tags_to_snapshot",
            Some(cluster.copy_tags_to_snapshot.unwrap_or(false)),
        )
        .string("neptune_subnet_group_name", cluster.db_subnet_group_name.clone())
        .strings("vpc_security_group_ids", &cluster.vpc_security_group_ids)
        .int("port", Some(cluster.db_port.unwrap_or(DEFAULT_PORT)))
        .string_map("tags", Some(&tags))
        .string("arn", cluster.db_cluster_arn.clone())
        .string("endpoint", cluster.endpoint.clone())
        .string("reader_endpoint", cluster.read_endpoint.clone())
        .string("cluster_resource_id", cluster.cluster_resource_id.clone())
        .string("status", cluster.status.clone())
        .finish()
}

/// Deleting without skip_final_snapshot needs a snapshot name
fn check_final_snapshot(attributes: &HashMap<String, Value>) -> ProviderResult<Option<String>> {
    let reader = AttributeReader::new(attributes);
    if reader.bool("skip_final_snapshot").unwrap_or(false) {
        return Ok(None);
    }
    match reader.string("final_snapshot_identifier") {
        Some(name) => Ok(Some(name)),
        None => Err(ProviderError::validation(
            "final_snapshot_identifier is required when skip_final_snapshot is false",
        )),
    }
}

/// A customer managed key only applies to encrypted storage
fn check_encryption(attributes: &HashMap<String, Value>) -> ProviderResult<()> {
    let reader = AttributeReader::new(attributes);
    if reader.string("kms_key_arn").is_some() && !reader.bool("storage_encrypted").unwrap_or(false)
    {
        return Err(ProviderError::validation(
            "kms_key_arn requires storage_encrypted to be true",
        ));
    }
    Ok(())
}

/// Patch for the attributes that can change in place
fn update_patch(changed: &[String], desired: &NeptuneCluster) -> Vec<PatchOperation> {
    fn set<T: Serialize>(property: &str, value: &Option<T>) -> PatchOperation {
        match value {
            Some(v) => PatchOperation::replace(property, json!(v)),
            None => PatchOperation::remove(property),
        }
    }

    changed
        .iter()
        .filter_map(|name| match name.as_str() {
            "engine_version" => Some(set("EngineVersion", &desired.engine_version)),
            "backup_retention_period" => Some(set(
                "BackupRetentionPeriod",
                &desired.backup_retention_period,
            )),
            "preferred_backup_window" => Some(set(
                "PreferredBackupWindow",
                &desired.preferred_backup_window,
            )),
            "preferred_maintenance_window" => Some(set(
                "PreferredMaintenanceWindow",
                &desired.preferred_maintenance_window,
            )),
            "iam_database_authentication_enabled" => {
                Some(set("IamAuthEnabled", &desired.iam_auth_enabled))
            }
            "deletion_protection" => Some(set("DeletionProtection", &desired.deletion_protection)),
            "copy_tags_to_snapshot" => {
                Some(set("CopyTagsToSnapshot", &desired.copy_tags_to_snapshot))
            }
            "vpc_security_group_ids" => Some(PatchOperation::replace(
                "VpcSecurityGroupIds",
                json!(desired.vpc_security_group_ids),
            )),
            "tags" => Some(PatchOperation::replace("Tags", json!(desired.tags))),
            _ => None,
        })
        .collect()
}

pub struct NeptuneClusterHandler {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(NeptuneClusterHandler { ctx: ctx.clone() })
}

impl NeptuneClusterHandler {
    async fn find(&self, identifier: &str) -> ProviderResult<Option<NeptuneCluster>> {
        match self.ctx.api.get_resource(TYPE_NAME, identifier).await? {
            Some(desc) => Ok(Some(from_properties(TYPE_NAME, desc.properties)?)),
            None => Ok(None),
        }
    }

    async fn status(
        &self,
        identifier: &str,
    ) -> ProviderResult<Observation<NeptuneCluster, ClusterStatus>> {
        Ok(match self.find(identifier).await? {
            Some(cluster) => {
                let status = ClusterStatus::parse(cluster.status.as_deref().unwrap_or_default());
                Observation::found(cluster, status)
            }
            None => Observation::NotFound,
        })
    }

    async fn wait_available(
        &self,
        pending: Vec<ClusterStatus>,
        identifier: &str,
        timeout: Duration,
        operation: &str,
    ) -> ProviderResult<NeptuneCluster> {
        self.ctx
            .waiter(pending, [ClusterStatus::Available], timeout)
            .until_present(|| self.status(identifier))
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!(
                        "waiting for Neptune Cluster ({}) {}",
                        identifier, operation
                    ))
                    .with_identifier(identifier)
            })
    }

    /// Remote attributes plus the local-only ones from `local`
    fn state(
        id: ResourceId,
        cluster: &NeptuneCluster,
        local: &HashMap<String, Value>,
    ) -> State {
        let mut attributes = flatten(cluster);
        for name in LOCAL_ATTRIBUTES {
            if let Some(value) = local.get(*name) {
                attributes.insert(name.to_string(), value.clone());
            }
        }
        State::existing(id, attributes).with_identifier(&cluster.db_cluster_identifier)
    }
}

#[async_trait]
impl ResourceHandler for NeptuneClusterHandler {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(120 * 60))
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        check_encryption(&resource.attributes)
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        match self.find(identifier).await {
            Ok(Some(cluster)) => Ok(Self::state(id.clone(), &cluster, &HashMap::new())),
            Ok(None) => {
                warn!("Neptune Cluster ({}) not found, removing from state", identifier);
                Ok(State::not_found(id.clone()))
            }
            Err(e) => Err(e
                .context(format!("reading Neptune Cluster ({})", identifier))
                .for_resource(id.clone())),
        }
    }

    async fn create(&self, resource: &Resource, timeouts: &Timeouts) -> ProviderResult<State> {
        let id = resource.id.clone();
        let desired = expand(&resource.attributes)?;
        let identifier = desired.db_cluster_identifier.clone();
        let properties = to_properties(&desired)?;
        let messages = self.ctx.retryable_messages(
            RESOURCE_TYPE,
            &[RetryableMessage::containing(
                "IAM role ARN value is invalid or does not include the required permissions",
            )],
        );

        debug!("creating Neptune Cluster ({})", identifier);
        self.ctx
            .propagation_retrier()
            .retry_on(
                || {
                    let api = self.ctx.api.clone();
                    let properties = properties.clone();
                    async move {
                        api.create_resource(TYPE_NAME, properties)
                            .await
                            .map_err(ProviderError::from)
                    }
                },
                &messages,
            )
            .await
            .map_err(|e| {
                e.context(format!("creating Neptune Cluster ({})", identifier))
                    .for_resource(id.clone())
            })?;

        let cluster = self
            .wait_available(
                ClusterStatus::create_pending(),
                &identifier,
                timeouts.create,
                "create",
            )
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        info!("Neptune Cluster ({}) is available", identifier);
        Ok(Self::state(id, &cluster, &resource.attributes))
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
        let patch = update_patch(&changed, &expand(&to.attributes)?);

        if patch.is_empty() {
            debug!(
                "Neptune Cluster ({}) has no remote changes, refreshing state",
                identifier
            );
            let cluster = self
                .find(identifier)
                .await?
                .ok_or_else(|| {
                    ProviderError::not_found(format!("Neptune Cluster ({}) not found", identifier))
                        .for_resource(id.clone())
                })?;
            return Ok(Self::state(id, &cluster, &to.attributes));
        }

        self.ctx
            .api
            .update_resource(TYPE_NAME, identifier, patch)
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!("updating Neptune Cluster ({})", identifier))
                    .for_resource(id.clone())
            })?;

        let cluster = self
            .wait_available(
                ClusterStatus::update_pending(),
                identifier,
                timeouts.update,
                "update",
            )
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        Ok(Self::state(id, &cluster, &to.attributes))
    }

    async fn delete(&self, state: &State, timeouts: &Timeouts) -> ProviderResult<()> {
        let id = state.id.clone();
        let identifier = require_identifier(state)?;
        let final_snapshot =
            check_final_snapshot(&state.attributes).map_err(|e| e.for_resource(id.clone()))?;

        debug!(
            "deleting Neptune Cluster ({}), final snapshot: {}",
            identifier,
            final_snapshot.as_deref().unwrap_or("none")
        );
        if let Err(e) = self
            .ctx
            .services
            .delete_neptune_cluster(identifier, final_snapshot.as_deref())
            .await
        {
            let e = ProviderError::from(e);
            if e.is_not_found() {
                return Ok(());
            }
            return Err(e
                .context(format!("deleting Neptune Cluster ({})", identifier))
                .for_resource(id));
        }

        self.ctx
            .waiter(ClusterStatus::delete_pending(), [], timeouts.delete)
            .wait(|| self.status(identifier))
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!("waiting for Neptune Cluster ({}) delete", identifier))
                    .for_resource(id)
                    .with_identifier(identifier)
            })?;
        Ok(())
    }
}
