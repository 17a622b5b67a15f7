//! Event dispatch for the hook channel: a startup-time registry of
//! listeners, the per-request context with its message sink, and the
//! dispatcher that drives listeners for one authenticated event.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    protocol::{HookMessage, HookType},
    transaction,
};

/// An entry in the server's repository inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
}

/// Repositories the server accepts hook events for, resolved by id.
/// Populated at startup and shared read-only with every connection.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Repository>,
}

impl RepositoryRegistry {
    pub fn new(repositories: impl IntoIterator<Item = Repository>) -> Self {
        Self {
            repositories: repositories
                .into_iter()
                .map(|repository| (repository.id.clone(), repository))
                .collect(),
        }
    }

    pub fn resolve(&self, repository_id: &str) -> Option<&Repository> {
        self.repositories.get(repository_id)
    }
}

/// Failure modes a listener may surface. Domain errors carry their own
/// user-facing message; anything else crosses the wire as the literal
/// text "unknown error".
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{message}")]
    Domain { code: String, message: String },
    #[error("unknown error")]
    Unknown(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    pub fn domain(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unknown(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unknown(source.into())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("repository {0} not found")]
    RepositoryNotFound(String),
    #[error("{message}")]
    Domain { code: String, message: String },
    #[error("unknown error")]
    Unknown(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<ListenerError> for DispatchError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Domain { code, message } => Self::Domain { code, message },
            ListenerError::Unknown(source) => Self::Unknown(source),
        }
    }
}

/// Hook detail handed to listeners. Messages appended through the sink
/// are relayed to the end user in emission order.
pub struct HookContext {
    repository_id: String,
    hook_type: HookType,
    node: Option<String>,
    messages: Mutex<Vec<HookMessage>>,
}

impl HookContext {
    pub fn new(repository_id: impl Into<String>, hook_type: HookType, node: Option<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            hook_type,
            node,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    pub fn hook_type(&self) -> HookType {
        self.hook_type
    }

    /// Changeset the event refers to, when the VCS supplied one.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn note(&self, text: impl Into<String>) {
        self.messages.lock().push(HookMessage::note(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.messages.lock().push(HookMessage::error(text));
    }

    pub fn into_messages(self) -> Vec<HookMessage> {
        self.messages.into_inner()
    }
}

pub trait HookListener: Send + Sync {
    fn on_event(&self, context: &HookContext) -> Result<(), ListenerError>;
}

/// Adapts a closure into a listener registration.
pub fn from_fn<F>(f: F) -> Arc<dyn HookListener>
where
    F: Fn(&HookContext) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    struct FnListener<F>(F);

    impl<F> HookListener for FnListener<F>
    where
        F: Fn(&HookContext) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        fn on_event(&self, context: &HookContext) -> Result<(), ListenerError> {
            (self.0)(context)
        }
    }

    Arc::new(FnListener(f))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryScope {
    All,
    Repository(String),
}

impl RepositoryScope {
    fn matches(&self, repository_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Repository(id) => id == repository_id,
        }
    }
}

struct Registration {
    hook_type: HookType,
    scope: RepositoryScope,
    listener: Arc<dyn HookListener>,
}

/// Ordered listener registrations, populated at startup and never
/// mutated per-request.
#[derive(Default)]
pub struct HookRegistry {
    registrations: Vec<Registration>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        hook_type: HookType,
        scope: RepositoryScope,
        listener: Arc<dyn HookListener>,
    ) {
        self.registrations.push(Registration {
            hook_type,
            scope,
            listener,
        });
    }

    fn matching<'a>(
        &'a self,
        hook_type: HookType,
        repository_id: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn HookListener>> {
        self.registrations
            .iter()
            .filter(move |registration| {
                registration.hook_type == hook_type && registration.scope.matches(repository_id)
            })
            .map(|registration| &registration.listener)
    }
}

/// Resolves the repository and drives the matching listeners for one
/// event, in registration order, synchronously on the calling task.
/// The first listener error stops dispatch; deciding abort/continue is
/// left to the response builder.
pub struct HookDispatcher {
    repositories: Arc<RepositoryRegistry>,
    registry: Arc<HookRegistry>,
}

impl HookDispatcher {
    pub fn new(repositories: Arc<RepositoryRegistry>, registry: Arc<HookRegistry>) -> Self {
        Self {
            repositories,
            registry,
        }
    }

    pub fn dispatch(&self, context: &HookContext) -> Result<(), DispatchError> {
        let repository = self
            .repositories
            .resolve(context.repository_id())
            .ok_or_else(|| DispatchError::RepositoryNotFound(context.repository_id().to_string()))?;
        debug!(
            repository = %repository.name,
            hook = %context.hook_type(),
            "dispatching hook event"
        );
        for listener in self.registry.matching(context.hook_type(), context.repository_id()) {
            listener.on_event(context)?;
        }
        Ok(())
    }
}

/// Built-in listener that records every event in the server log,
/// including the transaction id active for the dispatch.
pub struct LogListener;

impl HookListener for LogListener {
    fn on_event(&self, context: &HookContext) -> Result<(), ListenerError> {
        info!(
            repository = %context.repository_id(),
            hook = %context.hook_type(),
            node = context.node().unwrap_or("-"),
            transaction_id = transaction::current().as_deref().unwrap_or("-"),
            "hook event received"
        );
        Ok(())
    }
}
