//! Provider - Traits abstracting resource operations
//!
//! A [`Provider`] is the surface the declarative framework talks to. It routes
//! every call to the [`ResourceHandler`] or [`DataSourceHandler`] registered for
//! the resource type.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::config::Timeouts;
use crate::resource::{Resource, ResourceId, State};
use crate::retry::RetryError;
use crate::schema::{ResourceSchema, TypeError};
use crate::waiter::WaitError;

/// Broad classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    UnexpectedState,
    /// Throttling, eventual consistency and other conditions worth retrying
    Transient,
    Permanent,
    /// Rejected before any remote call was made
    Validation,
    Cancelled,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// Error code reported by the remote API (e.g., "ResourceNotFoundException")
    pub code: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub identifier: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.resource_id, &self.identifier) {
            (Some(id), Some(identifier)) => write!(
                f,
                "[{}.{} ({})] {}",
                id.resource_type, id.name, identifier, self.message
            ),
            (Some(id), None) => write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message),
            (None, Some(identifier)) => write!(f, "[{}] {}", identifier, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            code: None,
            resource_id: None,
            identifier: None,
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::NotFound)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Transient)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    /// Attach the remote identifier unless one is already set
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        if self.identifier.is_none() {
            self.identifier = Some(identifier.into());
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Prefix the message with the operation that failed
    pub fn context(mut self, operation: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", operation, self.message);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl<T, E> From<WaitError<T, E>> for ProviderError
where
    E: Into<ProviderError> + fmt::Display,
{
    fn from(err: WaitError<T, E>) -> Self {
        let kind = match &err {
            WaitError::NotFound { .. } => ErrorKind::NotFound,
            WaitError::Timeout { .. } => ErrorKind::Timeout,
            WaitError::UnexpectedState { .. } => ErrorKind::UnexpectedState,
            WaitError::Cancelled { .. } => ErrorKind::Cancelled,
            WaitError::Refresh(_) => ErrorKind::Permanent,
        };
        match err {
            WaitError::Refresh(e) => e.into(),
            other => ProviderError::new(other.to_string()).with_kind(kind),
        }
    }
}

impl<E> From<RetryError<E>> for ProviderError
where
    E: Into<ProviderError>,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => {
                ProviderError::new("operation cancelled while retrying")
                    .with_kind(ErrorKind::Cancelled)
            }
            RetryError::Failed(e) => e.into(),
        }
    }
}

impl From<Vec<TypeError>> for ProviderError {
    fn from(errors: Vec<TypeError>) -> Self {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        ProviderError::validation(message)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// CRUD handler for one managed resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource type name (e.g., "neptune_cluster")
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Cross-attribute checks the schema cannot express
    fn validate(&self, _resource: &Resource) -> ProviderResult<()> {
        Ok(())
    }

    /// Returns `State::not_found()` if the resource does not exist
    async fn read(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State>;

    async fn create(&self, resource: &Resource, timeouts: &Timeouts) -> ProviderResult<State>;

    async fn update(
        &self,
        from: &State,
        to: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State>;

    async fn delete(&self, state: &State, timeouts: &Timeouts) -> ProviderResult<()>;
}

/// Read-only lookup for one data source type
#[async_trait]
pub trait DataSourceHandler: Send + Sync {
    fn resource_type(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    async fn read(&self, config: &Resource) -> ProviderResult<State>;
}

/// Main Provider trait
///
/// Each infrastructure provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws")
    fn name(&self) -> &'static str;

    /// Schemas of every resource and data source type this Provider handles
    fn schemas(&self) -> Vec<ResourceSchema>;

    /// Validate configuration without making any remote call
    fn validate(&self, resource: &Resource) -> ProviderResult<()>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist or no
    /// identifier is known yet.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Look up a data source
    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the remote ID
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource
    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn schemas(&self) -> Vec<ResourceSchema> {
        (**self).schemas()
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        (**self).validate(resource)
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(resource)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(&self, from: &State, to: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(from, to)
    }

    fn delete(&self, state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(state)
    }
}
