//! SQS queue attribute resources
//!
//! `sqs_queue_policy`, `sqs_queue_redrive_policy` and
//! `sqs_queue_redrive_allow_policy` each own a single JSON attribute of an
//! existing queue. They share one handler parameterised by [`QueueAttribute`].
//!
//! SQS applies attribute changes eventually, so every write is followed by a
//! propagation wait that requires several consecutive matching reads.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use strata_core::config::Timeouts;
use strata_core::deadline::Deadline;
use strata_core::differ;
use strata_core::provider::{ProviderError, ProviderResult, ResourceHandler};
use strata_core::resource::{Resource, ResourceId, State, Value};
use strata_core::retry::RetryableMessage;
use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use strata_core::waiter::{Observation, StateWaiter};

use super::require_identifier;
use crate::context::ServiceContext;
use crate::flex::{AttributeReader, AttributeWriter};

const PROPAGATION_OCCURRENCES: u32 = 6;
const PROPAGATION_NOT_FOUND_CHECKS: u32 = 10;
const PROPAGATION_MIN_DELAY: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAttribute {
    Policy,
    RedrivePolicy,
    RedriveAllowPolicy,
}

impl QueueAttribute {
    pub fn resource_type(self) -> &'static str {
        match self {
            Self::Policy => "sqs_queue_policy",
            Self::RedrivePolicy => "sqs_queue_redrive_policy",
            Self::RedriveAllowPolicy => "sqs_queue_redrive_allow_policy",
        }
    }

    /// Attribute name in configuration
    pub fn attribute_name(self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::RedrivePolicy => "redrive_policy",
            Self::RedriveAllowPolicy => "redrive_allow_policy",
        }
    }

    /// Queue attribute name in SQS
    fn property(self) -> &'static str {
        match self {
            Self::Policy => "Policy",
            Self::RedrivePolicy => "RedrivePolicy",
            Self::RedriveAllowPolicy => "RedriveAllowPolicy",
        }
    }

    fn equivalent(self, a: &str, b: &str) -> bool {
        match self {
            Self::Policy => policies_equivalent(a, b),
            _ => match (normalize_json(a), normalize_json(b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

/// Result of comparing the remote attribute with the expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Propagation {
    NotEqual,
    Equal,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::NotEqual => f.write_str("notequal"),
            Propagation::Equal => f.write_str("equal"),
        }
    }
}

/// Re-serialize a JSON document with sorted keys and no insignificant whitespace
pub fn normalize_json(s: &str) -> ProviderResult<String> {
    let value: serde_json::Value = serde_json::from_str(s)
        .map_err(|e| ProviderError::validation(format!("invalid JSON: {}", e)))?;
    Ok(value.to_string())
}

/// IAM policy documents are equal when they differ only in key order, statement
/// order, or a single value written with or without an enclosing array
pub fn policies_equivalent(a: &str, b: &str) -> bool {
    fn canonical(value: serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Array(items) => {
                let mut items: Vec<serde_json::Value> = items.into_iter().map(canonical).collect();
                if items.len() == 1 {
                    return items.remove(0);
                }
                items.sort_by_key(|v| v.to_string());
                serde_json::Value::Array(items)
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, canonical(v))).collect(),
            ),
            other => other,
        }
    }

    match (
        serde_json::from_str::<serde_json::Value>(a),
        serde_json::from_str::<serde_json::Value>(b),
    ) {
        (Ok(a), Ok(b)) => canonical(a) == canonical(b),
        _ => false,
    }
}

/// The attribute as normalized JSON; SQS reports an unset attribute as
/// missing or empty
fn remote_value(attributes: &HashMap<String, String>, property: &str) -> Option<String> {
    match attributes.get(property)?.as_str() {
        "" => None,
        s => Some(normalize_json(s).unwrap_or_else(|_| s.to_string())),
    }
}

pub struct QueueAttributeHandler {
    ctx: ServiceContext,
    attribute: QueueAttribute,
}

pub fn policy_factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(QueueAttributeHandler::new(ctx, QueueAttribute::Policy))
}

pub fn redrive_policy_factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(QueueAttributeHandler::new(ctx, QueueAttribute::RedrivePolicy))
}

pub fn redrive_allow_policy_factory(ctx: &ServiceContext) -> Box<dyn ResourceHandler> {
    Box::new(QueueAttributeHandler::new(
        ctx,
        QueueAttribute::RedriveAllowPolicy,
    ))
}

impl QueueAttributeHandler {
    pub fn new(ctx: &ServiceContext, attribute: QueueAttribute) -> Self {
        Self {
            ctx: ctx.clone(),
            attribute,
        }
    }

    fn retryable_messages(&self) -> Vec<RetryableMessage> {
        self.ctx.retryable_messages(
            self.attribute.resource_type(),
            &[RetryableMessage::new(
                "InvalidAttributeValue",
                "Invalid value for the parameter Policy",
            )],
        )
    }

    /// Remote value of the attribute, `None` for a missing queue
    async fn fetch(&self, queue_url: &str) -> ProviderResult<Option<Option<String>>> {
        let attributes = self.ctx.services.get_queue_attributes(queue_url).await?;
        Ok(attributes.map(|attrs| remote_value(&attrs, self.attribute.property())))
    }

    /// Poll until the remote attribute matches `expected` (`None` means unset)
    async fn wait_propagated(
        &self,
        queue_url: &str,
        expected: Option<&str>,
        timeout: Duration,
    ) -> ProviderResult<()> {
        let waiter = StateWaiter::new([Propagation::NotEqual], [Propagation::Equal], timeout)
            .with_policy(self.ctx.config.wait.clone().with_min(PROPAGATION_MIN_DELAY))
            .with_continuous_target_occurrence(PROPAGATION_OCCURRENCES)
            .with_not_found_checks(PROPAGATION_NOT_FOUND_CHECKS)
            .with_cancellation(self.ctx.cancel.clone());

        let refresh = || async move {
            let observed = match self.fetch(queue_url).await {
                Ok(Some(observed)) => observed,
                // Nothing left to clear on a deleted queue
                Ok(None) if expected.is_none() => None,
                Ok(None) => return Ok(Observation::NotFound),
                Err(e) => return Err(e),
            };
            let status = match (expected, observed.as_deref()) {
                (None, None) => Propagation::Equal,
                (Some(want), Some(got)) if self.attribute.equivalent(want, got) => {
                    Propagation::Equal
                }
                _ => Propagation::NotEqual,
            };
            trace!("{} of {} is {}", self.attribute.property(), queue_url, status);
            Ok(Observation::found(observed, status))
        };

        waiter
            .until_present(refresh)
            .await
            .map(|_| ())
            .map_err(|e| {
                ProviderError::from(e)
                    .context(format!(
                        "waiting for SQS Queue ({}) attribute ({}) propagation",
                        queue_url,
                        self.attribute.property()
                    ))
                    .with_identifier(queue_url)
            })
    }

    async fn upsert(&self, resource: &Resource, timeout: Duration) -> ProviderResult<State> {
        let id = resource.id.clone();
        let reader = AttributeReader::new(&resource.attributes);
        let queue_url = reader.required_string("queue_url")?;
        let configured = reader.required_string(self.attribute.attribute_name())?;
        let normalized = normalize_json(&configured)?;

        let deadline = Deadline::after(timeout);
        let attributes = HashMap::from([(
            self.attribute.property().to_string(),
            normalized.clone(),
        )]);
        let messages = self.retryable_messages();

        debug!(
            "setting SQS Queue ({}) attribute {}",
            queue_url,
            self.attribute.property()
        );
        self.ctx
            .retrier(timeout / 2)
            .retry_on(
                || {
                    let services = self.ctx.services.clone();
                    let attributes = attributes.clone();
                    let queue_url = queue_url.clone();
                    async move {
                        services
                            .set_queue_attributes(&queue_url, attributes)
                            .await
                            .map_err(ProviderError::from)
                    }
                },
                &messages,
            )
            .await
            .map_err(|e| {
                e.context(format!(
                    "setting SQS Queue ({}) attribute ({})",
                    queue_url,
                    self.attribute.property()
                ))
                .for_resource(id.clone())
            })?;

        self.wait_propagated(&queue_url, Some(&normalized), deadline.remaining())
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        // Keep the configured text; the remote copy is known to be equivalent
        let attributes = AttributeWriter::new()
            .string("queue_url", Some(queue_url.clone()))
            .string(self.attribute.attribute_name(), Some(configured))
            .finish();
        Ok(State::existing(id, attributes).with_identifier(queue_url))
    }
}

#[async_trait]
impl ResourceHandler for QueueAttributeHandler {
    fn resource_type(&self) -> &'static str {
        self.attribute.resource_type()
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.attribute.resource_type())
            .with_description(format!(
                "The {} attribute of an SQS queue",
                self.attribute.property()
            ))
            .attribute(
                AttributeSchema::new("queue_url", AttributeType::String)
                    .required()
                    .requires_replace(),
            )
            .attribute(
                AttributeSchema::new(self.attribute.attribute_name(), types::json_string())
                    .required(),
            )
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::uniform(Duration::from_secs(2 * 60))
    }

    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        let result = self
            .ctx
            .retrier(READ_TIMEOUT)
            .retry_when_not_found(|| async move {
                match self.fetch(identifier).await? {
                    Some(value) => Ok(value),
                    None => Err(ProviderError::not_found(format!(
                        "SQS Queue ({}) not found",
                        identifier
                    ))),
                }
            })
            .await;

        let value = match result {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!(
                    "SQS Queue ({}) attribute ({}) not set, removing from state",
                    identifier,
                    self.attribute.property()
                );
                return Ok(State::not_found(id.clone()));
            }
            Err(e) if e.is_not_found() => {
                warn!("SQS Queue ({}) not found, removing from state", identifier);
                return Ok(State::not_found(id.clone()));
            }
            Err(e) => {
                return Err(e
                    .context(format!(
                        "reading SQS Queue ({}) attribute ({})",
                        identifier,
                        self.attribute.property()
                    ))
                    .for_resource(id.clone()));
            }
        };

        let attributes = AttributeWriter::new()
            .string("queue_url", Some(identifier))
            .string(self.attribute.attribute_name(), Some(value))
            .finish();
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn create(&self, resource: &Resource, timeouts: &Timeouts) -> ProviderResult<State> {
        self.upsert(resource, timeouts.create).await
    }

    async fn update(
        &self,
        from: &State,
        to: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let changed = differ::update_changes(&self.schema(), from, to)?;
        let name = self.attribute.attribute_name();

        // A reformatted but equivalent document needs no remote call
        let current = AttributeReader::new(&from.attributes).string(name);
        let desired = AttributeReader::new(&to.attributes).string(name);
        let equivalent = match (current.as_deref(), desired.as_deref()) {
            (Some(current), Some(desired)) => self.attribute.equivalent(current, desired),
            _ => false,
        };
        if changed.iter().all(|c| c == name) && equivalent {
            debug!(
                "{} of {} is unchanged",
                self.attribute.property(),
                require_identifier(from)?
            );
            let mut attributes = from.attributes.clone();
            if let Some(desired) = desired {
                attributes.insert(name.to_string(), Value::String(desired));
            }
            return Ok(State {
                id: to.id.clone(),
                identifier: from.identifier.clone(),
                attributes,
                exists: true,
            });
        }

        self.upsert(to, timeouts.update).await
    }

    async fn delete(&self, state: &State, timeouts: &Timeouts) -> ProviderResult<()> {
        let id = state.id.clone();
        let queue_url = require_identifier(state)?;

        debug!(
            "clearing SQS Queue ({}) attribute {}",
            queue_url,
            self.attribute.property()
        );
        let cleared = self
            .ctx
            .services
            .set_queue_attributes(
                queue_url,
                HashMap::from([(self.attribute.property().to_string(), String::new())]),
            )
            .await
            .map_err(ProviderError::from);
        match cleared {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(e
                    .context(format!(
                        "clearing SQS Queue ({}) attribute ({})",
                        queue_url,
                        self.attribute.property()
                    ))
                    .for_resource(id));
            }
        }

        self.wait_propagated(queue_url, None, timeouts.delete)
            .await
            .map_err(|e| e.for_resource(id))
    }
}
