//! Structured stage results returned by collaborators.

use super::StageKind;
use serde::{Deserialize, Serialize};

/// One table row: ordered string cells. The first row of a table is the header.
pub type TableRow = Vec<String>;

/// Position of the next empty row in the sink (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendPoint {
    /// The first empty row.
    pub next_row: u64,
    /// Whether the sink already carries a header row, when the locator knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_present: Option<bool>,
}

impl AppendPoint {
    /// Creates an append point without header information.
    #[must_use]
    pub fn new(next_row: u64) -> Self {
        Self {
            next_row,
            header_present: None,
        }
    }

    /// Sets the explicit header flag.
    #[must_use]
    pub fn with_header_present(mut self, present: bool) -> Self {
        self.header_present = Some(present);
        self
    }

    /// Returns true when the reported header flag contradicts the row index.
    ///
    /// An empty sink (row 1) cannot already hold a header, and a non-empty
    /// sink must hold one.
    #[must_use]
    pub fn is_contradictory(&self) -> bool {
        match self.header_present {
            Some(present) => present == (self.next_row == 1),
            None => false,
        }
    }
}

/// The semantic payload of a stage result.
///
/// Deserialization is untagged so collaborators can answer with plain JSON:
/// `null`, an integer row index, an append-point object, a list of rows, a
/// list of column values or a string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageContent {
    /// No payload (checkers, appenders).
    #[default]
    Empty,
    /// A bare row index.
    RowIndex(u64),
    /// An append point with optional header information.
    AppendPoint(AppendPoint),
    /// A table as rows of cells.
    Rows(Vec<TableRow>),
    /// One page of a spreadsheet column.
    Column(Vec<serde_json::Value>),
    /// Free text (CSV content, a date stamp, a summary).
    Text(String),
}

impl StageContent {
    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the row payload, if any.
    #[must_use]
    pub fn as_rows(&self) -> Option<&[TableRow]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Returns the number of values in a column page.
    ///
    /// An empty JSON list deserializes as empty `Rows`, so that counts as an
    /// empty page too.
    #[must_use]
    pub fn column_len(&self) -> Option<usize> {
        match self {
            Self::Column(values) => Some(values.len()),
            Self::Rows(rows) if rows.is_empty() => Some(0),
            _ => None,
        }
    }

    /// Returns the append point carried by this payload.
    #[must_use]
    pub fn append_point(&self) -> Option<AppendPoint> {
        match self {
            Self::RowIndex(row) => Some(AppendPoint::new(*row)),
            Self::AppendPoint(point) => Some(*point),
            _ => None,
        }
    }

    /// Returns true if there is no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// A short description of the payload shape, for error messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Empty => "nothing",
            Self::RowIndex(_) => "a row index",
            Self::AppendPoint(_) => "an append point",
            Self::Rows(_) => "rows",
            Self::Column(_) => "a column page",
            Self::Text(_) => "text",
        }
    }
}

/// The outcome of one collaborator call.
///
/// A result is either usable (validity true or absent, no error) or
/// unusable. The constructors never produce a result that is both valid
/// and erroring; a deserialized result carrying both counts as erroring.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageResult {
    /// The payload.
    #[serde(default)]
    pub content: StageContent,

    /// Where the payload came from (e.g. a URL).
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "source_url")]
    pub source_reference: Option<String>,

    /// Validity flag set by checker stages.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "is_valid")]
    pub validity: Option<bool>,

    /// Error reported by the collaborator or the transport.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "error")]
    pub error_message: Option<String>,

    /// Explanation for an invalid result.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "reason")]
    pub reason_message: Option<String>,

    /// The kind of collaborator that produced the result. Stamped by the driver.
    #[serde(skip)]
    pub origin: StageKind,
}

impl StageResult {
    /// Creates a usable result with the given payload.
    #[must_use]
    pub fn ok(content: StageContent) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    /// Creates a usable text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(StageContent::Text(text.into()))
    }

    /// Creates a usable result holding rows.
    #[must_use]
    pub fn rows(rows: Vec<TableRow>) -> Self {
        Self::ok(StageContent::Rows(rows))
    }

    /// Creates a usable result holding an append point.
    #[must_use]
    pub fn append_point(point: AppendPoint) -> Self {
        Self::ok(StageContent::AppendPoint(point))
    }

    /// Creates a checker result that passed.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            validity: Some(true),
            ..Self::default()
        }
    }

    /// Creates a checker result that failed validation.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            validity: Some(false),
            reason_message: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Creates an erroring result.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::default()
        }
    }

    /// Sets the source reference.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_reference = Some(source.into());
        self
    }

    /// Sets the origin kind.
    #[must_use]
    pub fn with_origin(mut self, origin: StageKind) -> Self {
        self.origin = origin;
        self
    }

    /// Returns true if the collaborator reported an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Returns true if a checker reported the payload as invalid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.validity == Some(false)
    }

    /// Returns true if the result can be handed to the next stage.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.is_error() && !self.is_invalid()
    }

    /// The most specific failure text available.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .or(self.reason_message.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_respect_usability() {
        assert!(StageResult::text("a,b").is_usable());
        assert!(StageResult::valid().is_usable());
        assert!(!StageResult::invalid("short table").is_usable());
        assert!(!StageResult::failed("timeout").is_usable());
        assert_eq!(StageResult::failed("timeout").validity, None);
    }

    #[test]
    fn test_error_wins_over_validity() {
        let result = StageResult {
            validity: Some(true),
            error_message: Some("boom".to_string()),
            ..StageResult::default()
        };
        assert!(!result.is_usable());
        assert_eq!(result.failure_reason(), Some("boom"));
    }

    #[test]
    fn test_deserialize_agent_field_names() {
        let json = r#"{"content": "Symbol,Name\nSPY,S&P", "source_url": "https://example.com"}"#;
        let result: StageResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.content.as_text(), Some("Symbol,Name\nSPY,S&P"));
        assert_eq!(result.source_reference.as_deref(), Some("https://example.com"));

        let json = r#"{"is_valid": false, "reason": "only 19 rows"}"#;
        let result: StageResult = serde_json::from_str(json).unwrap();
        assert!(result.is_invalid());
        assert_eq!(result.reason_message.as_deref(), Some("only 19 rows"));
        assert!(result.content.is_empty());
    }

    #[test]
    fn test_deserialize_content_shapes() {
        let result: StageResult = serde_json::from_str(r#"{"content": 22}"#).unwrap();
        assert_eq!(result.content.append_point(), Some(AppendPoint::new(22)));

        let result: StageResult =
            serde_json::from_str(r#"{"content": {"next_row": 42, "header_present": true}}"#).unwrap();
        assert_eq!(
            result.content.append_point(),
            Some(AppendPoint::new(42).with_header_present(true))
        );

        let result: StageResult = serde_json::from_str(r#"{"content": [["a", "b"], ["1", "2"]]}"#).unwrap();
        assert_eq!(result.content.as_rows().map(<[TableRow]>::len), Some(2));

        let result: StageResult = serde_json::from_str(r#"{"content": ["Volume", 12, "x"]}"#).unwrap();
        assert_eq!(result.content.column_len(), Some(3));

        let result: StageResult = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert_eq!(result.content.column_len(), Some(0));
    }

    #[test]
    fn test_origin_is_not_serialized() {
        let result = StageResult::valid().with_origin(StageKind::Checker);
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("origin"));
        let back: StageResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.origin, StageKind::Fetch);
    }

    #[test]
    fn test_append_point_contradictions() {
        assert!(!AppendPoint::new(1).is_contradictory());
        assert!(!AppendPoint::new(1).with_header_present(false).is_contradictory());
        assert!(AppendPoint::new(1).with_header_present(true).is_contradictory());
        assert!(AppendPoint::new(22).with_header_present(false).is_contradictory());
        assert!(!AppendPoint::new(22).with_header_present(true).is_contradictory());
    }
}
