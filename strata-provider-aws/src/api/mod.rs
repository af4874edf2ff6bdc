//! Remote control-plane API
//!
//! Handlers never talk to an SDK client directly. Resources with a Cloud
//! Control type go through the narrow [`CloudApi`] trait; the few operations
//! Cloud Control cannot express (activity streams, queue attributes, search)
//! go through [`ServiceApi`]. Both run against AWS and against scripted test
//! doubles.

mod cloudcontrol;
mod services;

pub use cloudcontrol::CloudControlApi;
pub use services::AwsServiceApi;

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use serde::{Deserialize, Serialize};
use strata_core::provider::{ErrorKind, ProviderError};
use thiserror::Error;

/// Error codes meaning the target does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "ResourceNotFound",
    "NotFound",
    "DBClusterNotFoundFault",
    "QueueDoesNotExist",
    "AWS.SimpleQueueService.NonExistentQueue",
];

/// Error codes worth retrying with backoff
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "ServiceInternalErrorException",
    "NetworkFailureException",
    "ConcurrentOperationException",
    "RequestLimitExceeded",
];

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("operation {request_token} failed: {message}")]
    OperationFailed {
        request_token: String,
        code: Option<String>,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Service { code, .. } => Some(code),
            ApiError::OperationFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) => ErrorKind::Transient,
            ApiError::InvalidResponse(_) => ErrorKind::Permanent,
            _ => match self.code() {
                Some(code) if NOT_FOUND_CODES.contains(&code) => ErrorKind::NotFound,
                Some(code) if TRANSIENT_CODES.contains(&code) => ErrorKind::Transient,
                _ => ErrorKind::Permanent,
            },
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let mut provider_err = ProviderError::new(err.to_string()).with_kind(err.kind());
        if let Some(code) = err.code() {
            provider_err = provider_err.with_code(code);
        }
        provider_err
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A resource as returned by the remote API
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescription {
    pub identifier: String,
    pub properties: serde_json::Value,
}

/// One page of a list call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub resources: Vec<ResourceDescription>,
    pub next_token: Option<String>,
}

/// A JSON Patch (RFC 6902) operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOperation {
    pub fn replace(property: &str, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: format!("/{}", property),
            value: Some(value),
        }
    }

    pub fn add(property: &str, value: serde_json::Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: format!("/{}", property),
            value: Some(value),
        }
    }

    pub fn remove(property: &str) -> Self {
        Self {
            op: PatchOp::Remove,
            path: format!("/{}", property),
            value: None,
        }
    }
}

/// Generic resource CRUD keyed by remote type name (e.g., "AWS::Neptune::DBCluster")
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Returns `None` when the resource does not exist
    async fn get_resource(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ApiResult<Option<ResourceDescription>>;

    /// Returns the identifier of the new resource
    async fn create_resource(
        &self,
        type_name: &str,
        desired_state: serde_json::Value,
    ) -> ApiResult<String>;

    async fn update_resource(
        &self,
        type_name: &str,
        identifier: &str,
        patch: Vec<PatchOperation>,
    ) -> ApiResult<()>;

    async fn delete_resource(&self, type_name: &str, identifier: &str) -> ApiResult<()>;

    async fn list_resources(
        &self,
        type_name: &str,
        filter: Option<serde_json::Value>,
        next_token: Option<String>,
    ) -> ApiResult<ListPage>;
}

/// Arguments of an RDS `StartActivityStream` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityStreamRequest {
    pub resource_arn: String,
    pub kms_key_id: String,
    pub mode: String,
    pub engine_native_audit_fields_included: bool,
}

/// Activity stream fields of a DB cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityStreamDescription {
    pub kms_key_id: Option<String>,
    pub mode: Option<String>,
    pub kinesis_stream_name: Option<String>,
    pub status: Option<String>,
}

/// One page of a Resource Explorer search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub resources: Vec<FoundResource>,
    pub next_token: Option<String>,
    pub view_arn: Option<String>,
    pub count: Option<ResourceCount>,
}

/// Timestamps are RFC 3339 in UTC with whole seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoundResource {
    pub arn: Option<String>,
    pub last_reported_at: Option<String>,
    pub owning_account_id: Option<String>,
    pub region: Option<String>,
    pub resource_type: Option<String>,
    pub service: Option<String>,
    pub properties: Vec<FoundProperty>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoundProperty {
    pub data: Option<serde_json::Value>,
    pub last_reported_at: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCount {
    pub complete: bool,
    pub total_resources: i64,
}

/// Service-specific calls for resources Cloud Control has no type for
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn start_activity_stream(&self, request: ActivityStreamRequest) -> ApiResult<()>;

    /// Returns `None` when the cluster does not exist
    async fn describe_activity_stream(
        &self,
        resource_arn: &str,
    ) -> ApiResult<Option<ActivityStreamDescription>>;

    async fn stop_activity_stream(&self, resource_arn: &str) -> ApiResult<()>;

    /// Delete a Neptune cluster, taking a final snapshot when one is named
    async fn delete_neptune_cluster(
        &self,
        identifier: &str,
        final_snapshot: Option<&str>,
    ) -> ApiResult<()>;

    /// Every attribute of a queue; `None` when the queue does not exist
    async fn get_queue_attributes(
        &self,
        queue_url: &str,
    ) -> ApiResult<Option<HashMap<String, String>>>;

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<String, String>,
    ) -> ApiResult<()>;

    async fn search(
        &self,
        query: &str,
        view_arn: Option<&str>,
        next_token: Option<String>,
    ) -> ApiResult<SearchPage>;
}

/// Shared SDK configuration for every client, using the default credential chain
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_error_codes() {
        assert_eq!(
            ApiError::service("ResourceNotFoundException", "gone").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ApiError::service("ThrottlingException", "slow down").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            ApiError::service("ValidationException", "cannot assume role").kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            ApiError::Transport("connection reset".to_string()).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn provider_error_keeps_code_and_message() {
        let err = ProviderError::from(ApiError::service(
            "ValidationException",
            "Bedrock cannot assume role",
        ));
        assert_eq!(err.code.as_deref(), Some("ValidationException"));
        assert!(err.message.contains("cannot assume role"));
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn patch_serializes_as_json_patch() {
        let ops = vec![
            PatchOperation::replace("Description", json!("new")),
            PatchOperation::remove("RedrivePolicy"),
        ];
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                {"op": "replace", "path": "/Description", "value": "new"},
                {"op": "remove", "path": "/RedrivePolicy"}
            ])
        );
    }
}
