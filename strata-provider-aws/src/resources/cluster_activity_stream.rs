//! rds_cluster_activity_stream resource

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use strata_core::config::Timeouts;
use strata_core::differ;
use strata_core::provider::{ProviderError, ProviderResult, ResourceHandler};
use strata_core::resource::{Resource, ResourceId, State, Value};
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use strata_core::waiter::Observation;

use super::require_identifier;
use crate::api::{ActivityStreamDescription, ActivityStreamRequest};
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter};

pub const RESOURCE_TYPE: &str = "rds_cluster_activity_stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Other(String),
}

impl StreamStatus {
    fn parse(s: &str) -> Self {
        match s {
            "starting" => Self::Starting,
            "started" => Self::Started,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Started => f.write_str("started"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// A running stream as read back from its cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityStream {
    pub resource_arn: String,
    pub kms_key_id: String,
    pub mode: String,
    pub engine_native_audit_fields_included: bool,
    pub kinesis_stream_name: Option<String>,
    pub status: Option<String>,
}

impl ActivityStream {
    /// A cluster without a stream, or with a stopped one, has no stream
    fn from_description(resource_arn: &str, desc: ActivityStreamDescription) -> Option<Self> {
        match desc.status.as_deref().map(StreamStatus::parse) {
            Some(StreamStatus::Stopped) | None => None,
            Some(_) => Some(Self {
                resource_arn: resource_arn.to_string(),
                kms_key_id: desc.kms_key_id.unwrap_or_default(),
                mode: desc.mode.unwrap_or_default(),
                engine_native_audit_fields_included: false,
                kinesis_stream_name: desc.kinesis_stream_name,
                status: desc.status,
            }),
        }
    }
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Database activity stream of an Aurora cluster")
        .attribute(
            AttributeSchema::new("resource_arn", types::arn())
                .required()
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new("kms_key_id", AttributeType::String)
                .required()
                .requires_replace(),
        )
        .attribute(
            AttributeSchema::new(
                "mode",
                AttributeType::Enum(vec!["sync".to_string(), "async".to_string()]),
            )
            .required()
            .requires_replace(),
        )
        .attribute(
            AttributeSchema::new("engine_native_audit_fields_included", AttributeType::Bool)
                .requires_replace()
                .with_default(Value::Bool(false)),
        )
        .attribute(AttributeSchema::new("kinesis_stream_name", AttributeType::String).computed())
}

pub fn expand(attributes: &HashMap<String, Value>) -> ProviderResult<ActivityStreamRequest> {
    let reader = AttributeReader::new(attributes);
    Ok(ActivityStreamRequest {
        resource_arn: reader.required_string("resource_arn")?,
        kms_key_id: reader.required_string("kms_key_id")?,
        mode: reader.required_string("mode")?,
        engine_native_audit_fields_included: reader
            .bool("engine_native_audit_fields_included")
            .unwrap_or(false),
    })
}

/// `engine_native_audit_fields_included` is write-only, so it is carried over
/// from `desired` when known
pub fn flatten(
    stream: &ActivityStream,
    desired: Option<&HashMap<String, Value>>,
) -> HashMap<String, Value> {
    let audit_fields = desired
        .and_then(|attrs| attrs.get("engine_native_audit_fields_included"))
        .and_then(Value::as_bool)
        .unwrap_or(stream.engine_native_audit_fields_included);
    AttributeWriter::new()
        .string("resource_arn", Some(stream.resource_arn.clone()))
        .string("kms_key_id", Some(stream.kms_key_id.clone()))
        .string("mode", Some(stream.mode.clone()))
        .bool("engine_native_audit_fields_included", Some(audit_fields))
        .string("kinesis_stream_name", stream.kinesis_stream_name.clone())
        .finish()
}

pub struct ActivityStreamHandler {
    ctx: ServiceContext,
}

pub fn factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(ActivityStreamHandler { ctx: ctx.clone() })
}

impl ActivityStreamHandler {
    async fn find(&self, resource_arn: &str) -> ProviderResult<Option<ActivityStream>> {
        let desc = self
            .ctx
            .services
            .describe_activity_stream(resource_arn)
            .await?;
        Ok(desc.and_then(|desc| ActivityStream::from_description(resource_arn, desc)))
    }

    async fn status(
        &self,
        resource_arn: &str,
    ) -> ProviderResult<Observation<ActivityStream, StreamStatus>> {
        Ok(match self.find(resource_arn).await? {
            Some(stream) => {
                let status = StreamStatus::parse(stream.status.as_deref().unwrap_or_default());
                Observation::found(stream, status)
            }
            None => Observation::NotFound,
        })
    }
}

#[async_trait]
impl ResourceHandler for ActivityStreamHandler {
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
            Ok(Some(stream)) => {
                Ok(State::existing(id.clone(), flatten(&stream, None)).with_identifier(identifier))
            }
            Ok(None) => {
                warn!(
                    "RDS Cluster Activity Stream ({}) not found, removing from state",
                    identifier
                );
                Ok(State::not_found(id.clone()))
            }
            Err(e) => Err(e
                .context(format!("reading RDS Cluster Activity Stream ({})", identifier))
                .for_resource(id.clone())),
        }
    }

    async fn create(&self, resource: &Resource, timeouts: &Timeouts) -> ProviderResult<State> {
        let id = resource.id.clone();
        let desired = expand(&resource.attributes)?;
        let arn = desired.resource_arn.clone();

        debug!("starting RDS Cluster Activity Stream ({})", arn);
        self.ctx
            .services
            .start_activity_stream(desired)
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!("starting RDS Cluster Activity Stream ({})", arn))
                    .for_resource(id.clone())
            })?;

        let stream = self
            .ctx
            .waiter([StreamStatus::Starting], [StreamStatus::Started], timeouts.create)
            .until_present(|| self.status(&arn))
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!(
                        "waiting for RDS Cluster Activity Stream ({}) start",
                        arn
                    ))
                    .for_resource(id.clone())
                    .with_identifier(arn.as_str())
            })?;

        Ok(
            State::existing(id, flatten(&stream, Some(&resource.attributes)))
                .with_identifier(arn),
        )
    }

    /// Every argument forces replacement, so an update only refreshes state
    async fn update(
        &self,
        from: &State,
        to: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let identifier = require_identifier(from)?;
        differ::update_changes(&schema(), from, to)?;
        let state = self.read(&to.id, identifier).await?;
        if !state.exists {
            return Err(ProviderError::not_found(format!(
                "RDS Cluster Activity Stream ({}) not found",
                identifier
            ))
            .for_resource(to.id.clone()));
        }
        Ok(state)
    }

    async fn delete(&self, state: &State, timeouts: &Timeouts) -> ProviderResult<()> {
        let id = state.id.clone();
        let identifier = require_identifier(state)?;

        debug!("stopping RDS Cluster Activity Stream ({})", identifier);
        if let Err(e) = self.ctx.services.stop_activity_stream(identifier).await {
            let e = ProviderError::from(e);
            if e.is_not_found() {
                return Ok(());
            }
            return Err(e
                .context(format!(
                    "stopping RDS Cluster Activity Stream ({})",
                    identifier
                ))
                .for_resource(id));
        }

        self.ctx
            .waiter([StreamStatus::Stopping], [], timeouts.delete)
            .wait(|| self.status(identifier))
            .await
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!(
                        "waiting for RDS Cluster Activity Stream ({}) stop",
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

    #[test]
    fn mode_must_be_sync_or_async() {
        let attrs = HashMap::from([
            (
                "resource_arn".to_string(),
                Value::string("arn:aws:rds:us-east-1:123456789012:cluster:audit"),
            ),
            ("kms_key_id".to_string(), Value::string("key-1")),
            ("mode".to_string(), Value::string("eventual")),
        ]);
        let errors = schema().validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("mode"));
    }

    #[test]
    fn flatten_keeps_configured_audit_flag() {
        let stream = ActivityStream::from_description(
            "arn:aws:rds:us-east-1:123456789012:cluster:audit",
            ActivityStreamDescription {
                kms_key_id: Some("key-1".to_string()),
                mode: Some("async".to_string()),
                kinesis_stream_name: Some("aws-rds-das-cluster-abc".to_string()),
                status: Some("started".to_string()),
            },
        )
        .unwrap();
        let desired = HashMap::from([(
            "engine_native_audit_fields_included".to_string(),
            Value::Bool(true),
        )]);

        let attrs = flatten(&stream, Some(&desired));
        assert_eq!(
            attrs["engine_native_audit_fields_included"],
            Value::Bool(true)
        );
        assert_eq!(
            attrs["kinesis_stream_name"],
            Value::string("aws-rds-das-cluster-abc")
        );
        assert_eq!(
            flatten(&stream, None)["engine_native_audit_fields_included"],
            Value::Bool(false)
        );
    }

    #[test]
    fn stopped_or_missing_stream_is_absent() {
        let arn = "arn:aws:rds:us-east-1:123456789012:cluster:audit";
        let stopped = ActivityStreamDescription {
            status: Some("stopped".to_string()),
            ..Default::default()
        };
        assert_eq!(ActivityStream::from_description(arn, stopped), None);
        assert_eq!(
            ActivityStream::from_description(arn, ActivityStreamDescription::default()),
            None
        );
    }
}
