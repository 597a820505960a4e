//! Collaborators: the external (or local stand-in) services the pipeline
//! drives.
//!
//! Every stage talks to its collaborator through one contract,
//! [`Collaborator::invoke`]. A returned `Err` is folded by the driver into a
//! [`StageResult`] with `error_message` set, so transport faults and
//! reported errors go through the gate the same way.

#[cfg(feature = "http")]
mod http;
mod local;
mod spec;

#[cfg(feature = "http")]
pub use http::HttpCollaborator;
pub use local::{
    CsvFileAppender, CsvFileLocator, DateColumnTransform, DateFormatChecker, StaticCollaborator,
    SystemClock, TableShapeChecker, DEFAULT_DATE_FORMAT,
};
pub use spec::CollaboratorSpec;

use crate::core::{StageContent, StageName, StageResult};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One task handed to a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The stage asking.
    pub stage: StageName,
    /// The natural-language task for an agent.
    pub description: String,
    /// The 1-based attempt number.
    pub attempt: usize,
    /// Content of earlier stages this task works on, keyed by stage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<StageName, StageContent>,
    /// Content built by the driver for this task (rows to append, the first
    /// row of a column page, earlier history rows for analysis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StageContent>,
}

impl TaskRequest {
    /// Creates a request for the first attempt with no attachments.
    #[must_use]
    pub fn new(stage: StageName, description: impl Into<String>) -> Self {
        Self {
            stage,
            description: description.into(),
            attempt: 1,
            inputs: BTreeMap::new(),
            payload: None,
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = attempt;
        self
    }

    /// Attaches the content of an earlier stage.
    #[must_use]
    pub fn with_input(mut self, stage: StageName, content: StageContent) -> Self {
        self.inputs.insert(stage, content);
        self
    }

    /// Sets the driver-built payload.
    #[must_use]
    pub fn with_payload(mut self, payload: StageContent) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the attached content of an earlier stage.
    #[must_use]
    pub fn input(&self, stage: StageName) -> Option<&StageContent> {
        self.inputs.get(&stage)
    }

    /// Returns the attached text of an earlier stage.
    #[must_use]
    pub fn input_text(&self, stage: StageName) -> Option<&str> {
        self.input(stage).and_then(StageContent::as_text)
    }
}

/// A service that performs one kind of stage task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &str;

    /// Performs the task.
    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError>;
}

type BoxedInvoke =
    dyn Fn(TaskRequest) -> BoxFuture<'static, Result<StageResult, CollaboratorError>> + Send + Sync;

/// A collaborator backed by an async closure.
pub struct FnCollaborator {
    name: String,
    func: Box<BoxedInvoke>,
}

impl FnCollaborator {
    /// Creates a collaborator from a closure returning a boxed future.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskRequest) -> BoxFuture<'static, Result<StageResult, CollaboratorError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnCollaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCollaborator")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Collaborator for FnCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        (self.func)(request.clone()).await
    }
}
