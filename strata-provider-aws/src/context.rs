//! Shared state handed to every handler factory

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strata_core::config::{ProviderConfig, TimeoutOverrides, Timeouts};
use strata_core::provider::{ProviderError, ProviderResult};
use strata_core::resource::Value;
use strata_core::retry::{Retrier, RetryableMessage};
use strata_core::waiter::StateWaiter;
use tokio_util::sync::CancellationToken;

use crate::api::{CloudApi, ServiceApi};

#[derive(Clone)]
pub struct ServiceContext {
    pub api: Arc<dyn CloudApi>,
    pub services: Arc<dyn ServiceApi>,
    pub config: Arc<ProviderConfig>,
    pub cancel: CancellationToken,
}

impl ServiceContext {
    pub fn new(
        api: Arc<dyn CloudApi>,
        services: Arc<dyn ServiceApi>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            api,
            services,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// Poller using the configured delay policy and cancellation
    pub fn waiter<S>(
        &self,
        pending: impl IntoIterator<Item = S>,
        target: impl IntoIterator<Item = S>,
        timeout: Duration,
    ) -> StateWaiter<S>
    where
        S: PartialEq + fmt::Display,
    {
        StateWaiter::new(pending, target, timeout)
            .with_policy(self.config.wait.clone())
            .with_cancellation(self.cancel.clone())
    }

    pub fn retrier(&self, timeout: Duration) -> Retrier {
        Retrier::new(timeout)
            .with_policy(self.config.retry.policy.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Retrier sized for IAM and data-access propagation delays
    pub fn propagation_retrier(&self) -> Retrier {
        self.retrier(self.config.retry.propagation_timeout)
    }

    pub fn retryable_messages(
        &self,
        resource_type: &str,
        defaults: &[RetryableMessage],
    ) -> Vec<RetryableMessage> {
        self.config.retryable_for(resource_type, defaults)
    }

    /// Handler defaults, then provider configuration, then the resource's own
    /// `timeouts` attribute
    pub fn timeouts(
        &self,
        resource_type: &str,
        defaults: Timeouts,
        attributes: &HashMap<String, Value>,
    ) -> ProviderResult<Timeouts> {
        let timeouts = self.config.timeouts_for(resource_type, defaults);
        match attributes.get("timeouts") {
            Some(value) => {
                let overrides = TimeoutOverrides::from_attribute(value)
                    .map_err(|e| ProviderError::validation(e.to_string()))?;
                Ok(timeouts.apply(&overrides))
            }
            None => Ok(timeouts),
        }
    }
}
