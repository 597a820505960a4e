//! Stage kind and stage name enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of collaborator that produced a result.
///
/// The gate uses the kind to decide whether an error is fatal or whether
/// the stage may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Fetches content from an external source (table, date).
    Fetch,
    /// Checks a previously fetched payload and reports validity.
    Checker,
    /// Reshapes content (adds the date column, renames headers).
    Transform,
    /// Reads the sink to find the next empty row.
    Locate,
    /// Writes rows to the sink.
    Append,
    /// Produces a narrative that does not gate the data path.
    Advisory,
}

impl Default for StageKind {
    fn default() -> Self {
        Self::Fetch
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Checker => write!(f, "checker"),
            Self::Transform => write!(f, "transform"),
            Self::Locate => write!(f, "locate"),
            Self::Append => write!(f, "append"),
            Self::Advisory => write!(f, "advisory"),
        }
    }
}

impl StageKind {
    /// Returns true if an error from this kind can be retried.
    #[must_use]
    pub fn retries_on_error(&self) -> bool {
        matches!(self, Self::Checker | Self::Advisory)
    }

    /// Returns true if the kind reports a validity flag.
    #[must_use]
    pub fn is_checker(&self) -> bool {
        matches!(self, Self::Checker)
    }
}

/// The named stages of a table pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Fetch the raw table.
    FetchTable,
    /// Validate the fetched table.
    CheckTable,
    /// Fetch the current date stamp.
    FetchDate,
    /// Validate the date stamp format.
    CheckDate,
    /// Add the date column and reshape the table.
    ModifyTable,
    /// Find the next empty row of the sink.
    LocateAppendPoint,
    /// Normalize cells and append the rows.
    NormalizeAndAppend,
    /// Compare the appended table against earlier data.
    AnalyzeTrends,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 8] = [
        Self::FetchTable,
        Self::CheckTable,
        Self::FetchDate,
        Self::CheckDate,
        Self::ModifyTable,
        Self::LocateAppendPoint,
        Self::NormalizeAndAppend,
        Self::AnalyzeTrends,
    ];

    /// Returns the snake-case name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTable => "fetch_table",
            Self::CheckTable => "check_table",
            Self::FetchDate => "fetch_date",
            Self::CheckDate => "check_date",
            Self::ModifyTable => "modify_table",
            Self::LocateAppendPoint => "locate_append_point",
            Self::NormalizeAndAppend => "normalize_and_append",
            Self::AnalyzeTrends => "analyze_trends",
        }
    }

    /// The collaborator kind that backs this stage.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::FetchTable | Self::FetchDate => StageKind::Fetch,
            Self::CheckTable | Self::CheckDate => StageKind::Checker,
            Self::ModifyTable => StageKind::Transform,
            Self::LocateAppendPoint => StageKind::Locate,
            Self::NormalizeAndAppend => StageKind::Append,
            Self::AnalyzeTrends => StageKind::Advisory,
        }
    }

    /// Stages whose ledger entries this stage is allowed to read.
    #[must_use]
    pub fn inputs(&self) -> &'static [StageName] {
        match self {
            Self::FetchTable | Self::FetchDate => &[],
            Self::CheckTable => &[Self::FetchTable],
            Self::CheckDate => &[Self::FetchDate],
            Self::ModifyTable => &[Self::FetchTable, Self::FetchDate],
            Self::LocateAppendPoint => &[],
            Self::NormalizeAndAppend => &[Self::ModifyTable, Self::LocateAppendPoint],
            Self::AnalyzeTrends => &[Self::FetchDate, Self::ModifyTable, Self::NormalizeAndAppend],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Fetch.to_string(), "fetch");
        assert_eq!(StageKind::Checker.to_string(), "checker");
        assert_eq!(StageKind::Locate.to_string(), "locate");
        assert_eq!(StageKind::Advisory.to_string(), "advisory");
    }

    #[test]
    fn test_stage_kind_retries_on_error() {
        assert!(StageKind::Checker.retries_on_error());
        assert!(StageKind::Advisory.retries_on_error());
        assert!(!StageKind::Fetch.retries_on_error());
        assert!(!StageKind::Append.retries_on_error());
        assert!(!StageKind::Locate.retries_on_error());
    }

    #[test]
    fn test_stage_name_kinds() {
        assert_eq!(StageName::FetchTable.kind(), StageKind::Fetch);
        assert_eq!(StageName::CheckDate.kind(), StageKind::Checker);
        assert_eq!(StageName::NormalizeAndAppend.kind(), StageKind::Append);
    }

    #[test]
    fn test_stage_order_is_sorted() {
        let mut sorted = StageName::ALL;
        sorted.sort();
        assert_eq!(sorted, StageName::ALL);
    }

    #[test]
    fn test_inputs_only_point_backwards() {
        for stage in StageName::ALL {
            for input in stage.inputs() {
                assert!(input < &stage, "{stage} reads later stage {input}");
            }
        }
    }

    #[test]
    fn test_stage_name_serialize() {
        let json = serde_json::to_string(&StageName::LocateAppendPoint).unwrap();
        assert_eq!(json, r#""locate_append_point""#);
    }
}
