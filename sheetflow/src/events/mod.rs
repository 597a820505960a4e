//! Pipeline lifecycle events.
//!
//! The driver reports progress as [`PipelineEvent`]s through an
//! [`EventSink`]. Sinks never influence control flow.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::StageName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run began.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A stage began its first attempt.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage began a further attempt.
    #[serde(rename = "stage.retrying")]
    StageRetrying,
    /// A stage's result was accepted.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage was aborted.
    #[serde(rename = "stage.aborted")]
    StageAborted,
    /// The run finished.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// The run failed.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
}

impl EventKind {
    /// The dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::StageStarted => "stage.started",
            Self::StageRetrying => "stage.retrying",
            Self::StageCompleted => "stage.completed",
            Self::StageAborted => "stage.aborted",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
        }
    }

    /// Returns true for events that report a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::StageAborted | Self::PipelineFailed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The pipeline name.
    pub pipeline: String,
    /// The run id.
    pub run_id: Uuid,
    /// The stage, for stage events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// The 1-based attempt number, where relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<usize>,
    /// Extra data (reasons, counts).
    #[serde(default)]
    pub data: serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event with no stage or data.
    #[must_use]
    pub fn new(kind: EventKind, pipeline: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            kind,
            pipeline: pipeline.into(),
            run_id,
            stage: None,
            attempt: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Sets the data payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_dotted_type() {
        let event = PipelineEvent::new(EventKind::StageRetrying, "etf", Uuid::nil())
            .with_stage(StageName::CheckDate)
            .with_attempt(2)
            .with_data(serde_json::json!({"reason": "bad format"}));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage.retrying");
        assert_eq!(json["stage"], "check_date");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["data"]["reason"], "bad format");
    }

    #[test]
    fn test_failure_kinds() {
        assert!(EventKind::StageAborted.is_failure());
        assert!(EventKind::PipelineFailed.is_failure());
        assert!(!EventKind::StageRetrying.is_failure());
    }
}
