//! Local stand-in collaborators.
//!
//! These perform the stage tasks without an agent: reading the clock,
//! checking shapes and formats, reshaping the table and reading/writing a
//! local CSV sink.

use super::{Collaborator, TaskRequest};
use crate::core::{AppendPoint, StageContent, StageName, StageResult, TableRow};
use crate::errors::CollaboratorError;
use crate::table::{self, TableShape};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

/// Format of the date stamp the pipeline works with.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Returns the local time as the date stamp.
#[derive(Debug, Clone)]
pub struct SystemClock {
    format: String,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl SystemClock {
    /// Creates a clock with a `chrono` format string.
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

#[async_trait]
impl Collaborator for SystemClock {
    fn name(&self) -> &str {
        "system_clock"
    }

    async fn invoke(&self, _request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let stamp = Local::now().format(&self.format).to_string();
        Ok(StageResult::text(stamp).with_source("local clock"))
    }
}

/// Checks that the fetched date stamp parses with a format.
#[derive(Debug, Clone)]
pub struct DateFormatChecker {
    format: String,
}

impl Default for DateFormatChecker {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl DateFormatChecker {
    /// Creates a checker with a `chrono` format string.
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

#[async_trait]
impl Collaborator for DateFormatChecker {
    fn name(&self) -> &str {
        "date_format"
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let stamp = request
            .input_text(StageName::FetchDate)
            .ok_or_else(|| CollaboratorError::missing_attachment(self.name(), "the fetched date stamp"))?;

        Ok(match NaiveDateTime::parse_from_str(stamp.trim(), &self.format) {
            Ok(_) => StageResult::valid(),
            Err(err) => StageResult::invalid(format!(
                "date '{stamp}' does not match {}: {err}",
                self.format
            )),
        })
    }
}

/// Checks the fetched CSV against a [`TableShape`].
#[derive(Debug, Clone, Default)]
pub struct TableShapeChecker {
    shape: TableShape,
}

impl TableShapeChecker {
    /// Creates a checker for a shape.
    #[must_use]
    pub fn new(shape: TableShape) -> Self {
        Self { shape }
    }
}

#[async_trait]
impl Collaborator for TableShapeChecker {
    fn name(&self) -> &str {
        "table_shape"
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let rows = match request.input(StageName::FetchTable) {
            Some(StageContent::Text(text)) => match table::parse_rows(text) {
                Ok(rows) => rows,
                Err(err) => return Ok(StageResult::invalid(format!("malformed CSV: {err}"))),
            },
            Some(StageContent::Rows(rows)) => rows.clone(),
            _ => {
                return Err(CollaboratorError::missing_attachment(
                    self.name(),
                    "the fetched table",
                ))
            }
        };

        Ok(match self.shape.check(&rows) {
            Ok(()) => StageResult::valid(),
            Err(reason) => StageResult::invalid(reason),
        })
    }
}

/// Inserts the date as the first column and renames headers.
#[derive(Debug, Clone)]
pub struct DateColumnTransform {
    date_header: String,
    renames: HashMap<String, String>,
}

impl Default for DateColumnTransform {
    fn default() -> Self {
        Self::new("Date")
    }
}

impl DateColumnTransform {
    /// Creates a transform with the given date header.
    #[must_use]
    pub fn new(date_header: impl Into<String>) -> Self {
        Self {
            date_header: date_header.into(),
            renames: HashMap::new(),
        }
    }

    /// Adds header renames.
    #[must_use]
    pub fn with_renames(mut self, renames: HashMap<String, String>) -> Self {
        self.renames.extend(renames);
        self
    }
}

#[async_trait]
impl Collaborator for DateColumnTransform {
    fn name(&self) -> &str {
        "date_column"
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let date = request
            .input_text(StageName::FetchDate)
            .ok_or_else(|| CollaboratorError::missing_attachment(self.name(), "the fetched date stamp"))?;
        let rows: Vec<TableRow> = match request.input(StageName::FetchTable) {
            Some(StageContent::Text(text)) => {
                table::parse_rows(text).map_err(|e| CollaboratorError::local(self.name(), e))?
            }
            Some(StageContent::Rows(rows)) => rows.clone(),
            _ => {
                return Err(CollaboratorError::missing_attachment(
                    self.name(),
                    "the fetched table",
                ))
            }
        };

        let modified = table::add_date_column(&rows, &self.date_header, date.trim(), &self.renames);
        let csv = table::rows_to_string(&modified).map_err(|e| CollaboratorError::local(self.name(), e))?;
        Ok(StageResult::text(csv))
    }
}

/// Finds the next empty row of a local CSV file.
#[derive(Debug, Clone)]
pub struct CsvFileLocator {
    path: PathBuf,
}

impl CsvFileLocator {
    /// Creates a locator for a file. A missing file counts as empty.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Collaborator for CsvFileLocator {
    fn name(&self) -> &str {
        "csv_file_locator"
    }

    async fn invoke(&self, _request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(CollaboratorError::local(self.name(), err)),
        };
        let records = table::count_records(&text).map_err(|e| CollaboratorError::local(self.name(), e))?;

        let point = AppendPoint::new(records.saturating_add(1)).with_header_present(records > 0);
        Ok(StageResult::append_point(point).with_source(self.path.display().to_string()))
    }
}

/// Appends rows to a local CSV file exactly as given.
#[derive(Debug, Clone)]
pub struct CsvFileAppender {
    path: PathBuf,
}

impl CsvFileAppender {
    /// Creates an appender for a file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Collaborator for CsvFileAppender {
    fn name(&self) -> &str {
        "csv_file_appender"
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let rows = request
            .payload
            .as_ref()
            .and_then(StageContent::as_rows)
            .ok_or_else(|| CollaboratorError::missing_attachment(self.name(), "rows to append"))?;

        let csv = table::rows_to_string(rows).map_err(|e| CollaboratorError::local(self.name(), e))?;
        let written = table::append_lines(&self.path, &csv)
            .await
            .map_err(|e| CollaboratorError::local(self.name(), e))?;

        tracing::debug!(path = %self.path.display(), rows = written, "Appended rows to CSV file");
        Ok(StageResult::text(format!("appended {written} rows"))
            .with_source(self.path.display().to_string()))
    }
}

/// Always answers with the same result.
#[derive(Debug, Clone)]
pub struct StaticCollaborator {
    name: String,
    result: StageResult,
}

impl StaticCollaborator {
    /// Creates a collaborator returning `result` on every call.
    #[must_use]
    pub fn new(name: impl Into<String>, result: StageResult) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }
}

#[async_trait]
impl Collaborator for StaticCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn date_request(stamp: &str) -> TaskRequest {
        TaskRequest::new(StageName::CheckDate, "check")
            .with_input(StageName::FetchDate, StageContent::Text(stamp.to_string()))
    }

    #[tokio::test]
    async fn test_system_clock_output_passes_date_check() {
        let stamp = SystemClock::default()
            .invoke(&TaskRequest::new(StageName::FetchDate, "now"))
            .await
            .unwrap();
        let text = stamp.content.as_text().unwrap();

        let checked = DateFormatChecker::default()
            .invoke(&date_request(text))
            .await
            .unwrap();
        assert_eq!(checked.validity, Some(true));
    }

    #[tokio::test]
    async fn test_date_checker_rejects_bad_format() {
        let result = DateFormatChecker::default()
            .invoke(&date_request("June 20, 2025"))
            .await
            .unwrap();
        assert!(result.is_invalid());
        assert!(result.reason_message.unwrap().contains("June 20, 2025"));

        let err = DateFormatChecker::default()
            .invoke(&TaskRequest::new(StageName::CheckDate, "check"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::MissingAttachment { .. }));
    }

    #[tokio::test]
    async fn test_table_shape_checker() {
        let checker = TableShapeChecker::new(TableShape::new().require_header("Symbol").with_data_rows(1));
        let request = |csv: &str| {
            TaskRequest::new(StageName::CheckTable, "check")
                .with_input(StageName::FetchTable, StageContent::Text(csv.to_string()))
        };

        let ok = checker.invoke(&request("Symbol,Price\nSPY,1\n")).await.unwrap();
        assert_eq!(ok.validity, Some(true));

        let short = checker.invoke(&request("Symbol,Price\n")).await.unwrap();
        assert_eq!(short.reason_message.as_deref(), Some("expected 1 data rows, found 0"));
    }

    #[tokio::test]
    async fn test_date_column_transform() {
        let request = TaskRequest::new(StageName::ModifyTable, "modify")
            .with_input(StageName::FetchTable, StageContent::Text("Symbol,Price\nSPY,1\n".to_string()))
            .with_input(StageName::FetchDate, StageContent::Text("2025-06-20 10:00:00".to_string()));

        let result = DateColumnTransform::default().invoke(&request).await.unwrap();
        assert_eq!(
            result.content.as_text(),
            Some("Date,Symbol,Price\n2025-06-20 10:00:00,SPY,1\n")
        );
    }

    #[tokio::test]
    async fn test_csv_file_locator_and_appender() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        let locator = CsvFileLocator::new(&path);
        let appender = CsvFileAppender::new(&path);
        let locate = TaskRequest::new(StageName::LocateAppendPoint, "locate");

        let point = locator.invoke(&locate).await.unwrap().content.append_point().unwrap();
        assert_eq!(point, AppendPoint::new(1).with_header_present(false));

        let rows = vec![
            vec!["Date".to_string(), "Symbol".to_string()],
            vec!["d".to_string(), "SPY".to_string()],
        ];
        let append = TaskRequest::new(StageName::NormalizeAndAppend, "append")
            .with_payload(StageContent::Rows(rows));
        let result = appender.invoke(&append).await.unwrap();
        assert_eq!(result.content.as_text(), Some("appended 2 rows"));

        let point = locator.invoke(&locate).await.unwrap().content.append_point().unwrap();
        assert_eq!(point, AppendPoint::new(3).with_header_present(true));
    }

    #[tokio::test]
    async fn test_appender_requires_rows() {
        let dir = tempdir().unwrap();
        let appender = CsvFileAppender::new(dir.path().join("sheet.csv"));
        let err = appender
            .invoke(&TaskRequest::new(StageName::NormalizeAndAppend, "append"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rows to append"));
    }
}
