//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::collaborators::{Collaborator, TaskRequest};
use crate::core::{StageContent, StageResult};
use crate::errors::CollaboratorError;

type Scripted = Result<StageResult, CollaboratorError>;

/// A collaborator that answers from a queue and records every request.
///
/// Once the queue is empty it keeps returning the fallback answer.
#[derive(Debug)]
pub struct ScriptedCollaborator {
    name: String,
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Scripted>,
    requests: Mutex<Vec<TaskRequest>>,
}

impl ScriptedCollaborator {
    /// Creates a collaborator whose fallback is an empty usable result.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(StageResult::default())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a collaborator that always returns `result`.
    #[must_use]
    pub fn always(name: impl Into<String>, result: StageResult) -> Self {
        let collaborator = Self::new(name);
        *collaborator.fallback.lock() = Ok(result);
        collaborator
    }

    /// Creates a collaborator that answers with `results` in order, then
    /// repeats the last one.
    #[must_use]
    pub fn sequence(name: impl Into<String>, results: Vec<StageResult>) -> Self {
        let collaborator = Self::new(name);
        if let Some(last) = results.last() {
            *collaborator.fallback.lock() = Ok(last.clone());
        }
        collaborator.queue.lock().extend(results.into_iter().map(Ok));
        collaborator
    }

    /// Queues a result.
    #[must_use]
    pub fn then(self, result: StageResult) -> Self {
        self.queue.lock().push_back(Ok(result));
        self
    }

    /// Queues a transport-level error.
    #[must_use]
    pub fn then_fail(self, error: CollaboratorError) -> Self {
        self.queue.lock().push_back(Err(error));
        self
    }

    /// Sets the answer returned once the queue is empty.
    #[must_use]
    pub fn otherwise(self, result: StageResult) -> Self {
        *self.fallback.lock() = Ok(result);
        self
    }

    /// Returns the number of times the collaborator was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().clone()
    }

    /// Returns the last request received.
    #[must_use]
    pub fn last_request(&self) -> Option<TaskRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        self.requests.lock().push(request.clone());
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// A collaborator that pages through a fixed column, like a spreadsheet
/// reader asked for one window of rows at a time.
///
/// The request payload carries the first row of the window (1-based).
#[derive(Debug)]
pub struct ColumnPager {
    name: String,
    column: Vec<serde_json::Value>,
    page_size: usize,
    requests: Mutex<Vec<TaskRequest>>,
}

impl ColumnPager {
    /// Creates a pager over `filled_rows` non-empty rows.
    #[must_use]
    pub fn new(name: impl Into<String>, filled_rows: usize, page_size: usize) -> Self {
        let column = (0..filled_rows)
            .map(|i| {
                if i == 0 {
                    serde_json::json!("Date")
                } else {
                    serde_json::json!(format!("row {}", i + 1))
                }
            })
            .collect();
        Self {
            name: name.into(),
            column,
            page_size,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of pages served.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Collaborator for ColumnPager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        self.requests.lock().push(request.clone());
        let start = request
            .payload
            .as_ref()
            .and_then(|p| match p {
                StageContent::RowIndex(row) => Some(*row),
                _ => None,
            })
            .ok_or_else(|| CollaboratorError::missing_attachment(&self.name, "the first row of the page"))?;

        let from = usize::try_from(start.saturating_sub(1)).unwrap_or(usize::MAX);
        let page: Vec<_> = self
            .column
            .iter()
            .skip(from)
            .take(self.page_size)
            .cloned()
            .collect();
        Ok(StageResult::ok(StageContent::Column(page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;

    fn request() -> TaskRequest {
        TaskRequest::new(StageName::CheckTable, "check")
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_repeat() {
        let collaborator = ScriptedCollaborator::sequence(
            "checker",
            vec![StageResult::invalid("short"), StageResult::valid()],
        );

        let first = collaborator.invoke(&request()).await.unwrap();
        let second = collaborator.invoke(&request()).await.unwrap();
        let third = collaborator.invoke(&request()).await.unwrap();

        assert!(first.is_invalid());
        assert_eq!(second.validity, Some(true));
        assert_eq!(third.validity, Some(true));
        assert_eq!(collaborator.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_transport_error() {
        let collaborator = ScriptedCollaborator::new("fetch")
            .then_fail(CollaboratorError::Transport("reset".to_string()))
            .otherwise(StageResult::text("ok"));

        assert!(collaborator.invoke(&request()).await.is_err());
        assert!(collaborator.invoke(&request()).await.is_ok());
        assert_eq!(collaborator.last_request().unwrap().stage, StageName::CheckTable);
    }

    #[tokio::test]
    async fn test_column_pager() {
        let pager = ColumnPager::new("sheet", 5, 2);
        let page = |row: u64| {
            TaskRequest::new(StageName::LocateAppendPoint, "page")
                .with_payload(StageContent::RowIndex(row))
        };

        let first = pager.invoke(&page(1)).await.unwrap();
        assert_eq!(first.content.column_len(), Some(2));
        let last = pager.invoke(&page(5)).await.unwrap();
        assert_eq!(last.content.column_len(), Some(1));
        let past = pager.invoke(&page(7)).await.unwrap();
        assert_eq!(past.content.column_len(), Some(0));
        assert_eq!(pager.call_count(), 3);
    }
}
