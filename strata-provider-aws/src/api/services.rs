//! Per-service SDK clients behind [`ServiceApi`]

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_resourceexplorer2::operation::search::SearchOutput;
use aws_sdk_resourceexplorer2::types::{Resource, ResourceProperty};
use aws_sdk_rds::types::ActivityStreamMode;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_smithy_types::{DateTime, Document, Number};
use log::debug;
use strata_core::provider::ErrorKind;

use super::cloudcontrol::service_error;
use super::{
    ActivityStreamDescription, ActivityStreamRequest, ApiResult, FoundProperty, FoundResource,
    ResourceCount, SearchPage, ServiceApi,
};
use crate::flex::epoch_seconds_to_rfc3339;

/// RDS, Neptune, SQS and Resource Explorer clients sharing one SDK configuration
pub struct AwsServiceApi {
    rds: aws_sdk_rds::Client,
    neptune: aws_sdk_neptune::Client,
    sqs: aws_sdk_sqs::Client,
    resource_explorer: aws_sdk_resourceexplorer2::Client,
}

impl AwsServiceApi {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            rds: aws_sdk_rds::Client::new(config),
            neptune: aws_sdk_neptune::Client::new(config),
            sqs: aws_sdk_sqs::Client::new(config),
            resource_explorer: aws_sdk_resourceexplorer2::Client::new(config),
        }
    }
}

#[async_trait]
impl ServiceApi for AwsServiceApi {
    async fn start_activity_stream(&self, request: ActivityStreamRequest) -> ApiResult<()> {
        debug!("starting activity stream on {}", request.resource_arn);
        self.rds
            .start_activity_stream()
            .resource_arn(request.resource_arn)
            .kms_key_id(request.kms_key_id)
            .mode(ActivityStreamMode::from(request.mode.as_str()))
            .engine_native_audit_fields_included(request.engine_native_audit_fields_included)
            .apply_immediately(true)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn describe_activity_stream(
        &self,
        resource_arn: &str,
    ) -> ApiResult<Option<ActivityStreamDescription>> {
        let result = self
            .rds
            .describe_db_clusters()
            .db_cluster_identifier(resource_arn)
            .send()
            .await
            .map_err(service_error);

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(output
            .db_clusters()
            .first()
            .map(|cluster| ActivityStreamDescription {
                kms_key_id: cluster.activity_stream_kms_key_id().map(str::to_string),
                mode: cluster
                    .activity_stream_mode()
                    .map(|m| m.as_str().to_string()),
                kinesis_stream_name: cluster
                    .activity_stream_kinesis_stream_name()
                    .map(str::to_string),
                status: cluster
                    .activity_stream_status()
                    .map(|s| s.as_str().to_string()),
            }))
    }

    async fn stop_activity_stream(&self, resource_arn: &str) -> ApiResult<()> {
        debug!("stopping activity stream on {}", resource_arn);
        self.rds
            .stop_activity_stream()
            .resource_arn(resource_arn)
            .apply_immediately(true)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn delete_neptune_cluster(
        &self,
        identifier: &str,
        final_snapshot: Option<&str>,
    ) -> ApiResult<()> {
        debug!("deleting Neptune cluster {}", identifier);
        self.neptune
            .delete_db_cluster()
            .db_cluster_identifier(identifier)
            .skip_final_snapshot(final_snapshot.is_none())
            .set_final_db_snapshot_identifier(final_snapshot.map(str::to_string))
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
    ) -> ApiResult<Option<HashMap<String, String>>> {
        let result = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::All)
            .send()
            .await
            .map_err(service_error);

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(Some(
            output
                .attributes()
                .map(|attributes| {
                    attributes
                        .iter()
                        .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                        .collect()
                })
                .unwrap_or_default(),
        ))
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<String, String>,
    ) -> ApiResult<()> {
        let attributes = attributes
            .into_iter()
            .map(|(name, value)| (QueueAttributeName::from(name.as_str()), value))
            .collect();
        self.sqs
            .set_queue_attributes()
            .queue_url(queue_url)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        view_arn: Option<&str>,
        next_token: Option<String>,
    ) -> ApiResult<SearchPage> {
        let output = self
            .resource_explorer
            .search()
            .query_string(query)
            .set_view_arn(view_arn.map(str::to_string))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(service_error)?;
        Ok(search_page(&output))
    }
}

pub(crate) fn search_page(output: &SearchOutput) -> SearchPage {
    SearchPage {
        resources: output.resources().iter().map(found_resource).collect(),
        next_token: output.next_token().map(str::to_string),
        view_arn: output.view_arn().map(str::to_string),
        count: output.count().map(|count| ResourceCount {
            complete: count.complete().unwrap_or(false),
            total_resources: count.total_resources().unwrap_or(0),
        }),
    }
}

fn found_resource(resource: &Resource) -> FoundResource {
    FoundResource {
        arn: resource.arn().map(str::to_string),
        last_reported_at: resource.last_reported_at().and_then(timestamp),
        owning_account_id: resource.owning_account_id().map(str::to_string),
        region: resource.region().map(str::to_string),
        resource_type: resource.resource_type().map(str::to_string),
        service: resource.service().map(str::to_string),
        properties: resource.properties().iter().map(found_property).collect(),
    }
}

fn found_property(property: &ResourceProperty) -> FoundProperty {
    FoundProperty {
        data: property.data().map(document_to_json),
        last_reported_at: property.last_reported_at().and_then(timestamp),
        name: property.name().map(str::to_string),
    }
}

fn timestamp(t: &DateTime) -> Option<String> {
    epoch_seconds_to_rfc3339(t.secs())
}

fn document_to_json(doc: &Document) -> serde_json::Value {
    match doc {
        Document::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect(),
        ),
        Document::Array(items) => {
            serde_json::Value::Array(items.iter().map(document_to_json).collect())
        }
        Document::Number(Number::PosInt(n)) => serde_json::Value::from(*n),
        Document::Number(Number::NegInt(n)) => serde_json::Value::from(*n),
        Document::Number(Number::Float(f)) => serde_json::Value::from(*f),
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Null => serde_json::Value::Null,
    }
}
