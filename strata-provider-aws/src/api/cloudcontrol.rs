//! AWS Cloud Control implementation of [`CloudApi`]

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::{OperationStatus, ProgressEvent};
use log::debug;
use strata_core::backoff::DelayPolicy;
use strata_core::waiter::{Observation, StateWaiter, WaitError};

use super::{ApiError, ApiResult, CloudApi, ListPage, PatchOperation, ResourceDescription};

/// Cloud Control API client
pub struct CloudControlApi {
    client: CloudControlClient,
    operation_timeout: Duration,
    policy: DelayPolicy,
}

impl CloudControlApi {
    pub fn new(config: &SdkConfig) -> Self {
        Self::from_client(CloudControlClient::new(config))
    }

    pub fn from_client(client: CloudControlClient) -> Self {
        Self {
            client,
            operation_timeout: Duration::from_secs(10 * 60),
            policy: DelayPolicy::fixed(Duration::from_secs(5)),
        }
    }

    /// How long to wait for a single Cloud Control request to finish
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: DelayPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn operation_status(
        &self,
        request_token: &str,
    ) -> ApiResult<Observation<ProgressEvent, String>> {
        let output = self
            .client
            .get_resource_request_status()
            .request_token(request_token)
            .send()
            .await
            .map_err(service_error)?;

        Ok(match output.progress_event() {
            Some(progress) => {
                let status = progress
                    .operation_status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default();
                Observation::found(progress.clone(), status)
            }
            None => Observation::NotFound,
        })
    }

    /// Wait for a Cloud Control operation to complete, returning the resource identifier
    async fn wait_for_operation(&self, request_token: &str) -> ApiResult<String> {
        let waiter = StateWaiter::new(
            [OperationStatus::Pending, OperationStatus::InProgress].map(|s| s.as_str().to_string()),
            [OperationStatus::Success.as_str().to_string()],
            self.operation_timeout,
        )
        .with_policy(self.policy.clone());

        match waiter
            .until_present(|| self.operation_status(request_token))
            .await
        {
            Ok(progress) => Ok(progress.identifier().unwrap_or_default().to_string()),
            Err(WaitError::Refresh(e)) => Err(e),
            Err(WaitError::UnexpectedState {
                last_resource: Some(progress),
                ..
            }) => Err(ApiError::OperationFailed {
                request_token: request_token.to_string(),
                code: progress.error_code().map(|c| c.as_str().to_string()),
                message: progress
                    .status_message()
                    .unwrap_or("Unknown error")
                    .to_string(),
            }),
            Err(other) => Err(ApiError::OperationFailed {
                request_token: request_token.to_string(),
                code: None,
                message: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl CloudApi for CloudControlApi {
    async fn get_resource(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ApiResult<Option<ResourceDescription>> {
        let result = self
            .client
            .get_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.code() == Some("ResourceNotFoundException") => return Ok(None),
            Err(e) => return Err(service_error(e)),
        };

        let Some(desc) = output.resource_description() else {
            return Ok(None);
        };
        let properties = match desc.properties() {
            Some(props) => serde_json::from_str(props)
                .map_err(|e| ApiError::InvalidResponse(format!("properties of {}: {}", identifier, e)))?,
            None => serde_json::Value::Object(Default::default()),
        };

        Ok(Some(ResourceDescription {
            identifier: desc.identifier().unwrap_or(identifier).to_string(),
            properties,
        }))
    }

    async fn create_resource(
        &self,
        type_name: &str,
        desired_state: serde_json::Value,
    ) -> ApiResult<String> {
        debug!("creating {}", type_name);
        let result = self
            .client
            .create_resource()
            .type_name(type_name)
            .desired_state(desired_state.to_string())
            .send()
            .await
            .map_err(service_error)?;

        let request_token = result
            .progress_event()
            .and_then(|p| p.request_token())
            .ok_or_else(|| ApiError::InvalidResponse("no request token returned".to_string()))?;

        self.wait_for_operation(request_token).await
    }

    async fn update_resource(
        &self,
        type_name: &str,
        identifier: &str,
        patch: Vec<PatchOperation>,
    ) -> ApiResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let patch_document = serde_json::to_string(&patch)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to build patch: {}", e)))?;

        debug!("updating {} {}", type_name, identifier);
        let result = self
            .client
            .update_resource()
            .type_name(type_name)
            .identifier(identifier)
            .patch_document(patch_document)
            .send()
            .await
            .map_err(service_error)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }

        Ok(())
    }

    async fn delete_resource(&self, type_name: &str, identifier: &str) -> ApiResult<()> {
        debug!("deleting {} {}", type_name, identifier);
        let result = self
            .client
            .delete_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await
            .map_err(service_error)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }

        Ok(())
    }

    async fn list_resources(
        &self,
        type_name: &str,
        filter: Option<serde_json::Value>,
        next_token: Option<String>,
    ) -> ApiResult<ListPage> {
        let output = self
            .client
            .list_resources()
            .type_name(type_name)
            .set_resource_model(filter.map(|f| f.to_string()))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(service_error)?;

        let resources = output
            .resource_descriptions()
            .iter()
            .map(|desc| {
                let properties = match desc.properties() {
                    Some(props) => serde_json::from_str(props)
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?,
                    None => serde_json::Value::Object(Default::default()),
                };
                Ok(ResourceDescription {
                    identifier: desc.identifier().unwrap_or_default().to_string(),
                    properties,
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(ListPage {
            resources,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

/// Map an SDK error to an [`ApiError`], keeping the service error code when there is one
pub(super) fn service_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    match err.code() {
        Some(code) => ApiError::Service {
            code: code.to_string(),
            message: err.message().unwrap_or_default().to_string(),
        },
        None => ApiError::Transport(DisplayErrorContext(&err).to_string()),
    }
}
