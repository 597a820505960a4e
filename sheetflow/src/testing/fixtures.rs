//! Sample tables and a ready-made set of scripted collaborators.

use std::sync::Arc;

use super::mocks::ScriptedCollaborator;
use crate::collaborators::Collaborator;
use crate::core::{AppendPoint, StageResult};
use crate::pipeline::Collaborators;

/// Header of the sample ETF table.
pub const ETF_HEADER: &str = "Symbol,Name,Price,Change,Change %,Volume,YTD Return %";

/// The date stamp used by fixtures.
pub const SAMPLE_DATE: &str = "2025-06-20 16:00:00";

/// Builds a sample ETF table as CSV with `data_rows` rows after the header.
#[must_use]
pub fn etf_csv(data_rows: usize) -> String {
    let mut csv = String::from(ETF_HEADER);
    csv.push('\n');
    for i in 0..data_rows {
        let change = (i as f64 - 10.0) / 1000.0;
        csv.push_str(&format!(
            "ETF{i},Sample Fund {i},{:.2},{:.2},{change},{},{:.4}\n",
            100.0 + i as f64,
            change * 100.0,
            1_000_000 + i * 1000,
            0.05 + i as f64 / 100.0,
        ));
    }
    csv
}

/// Scripted collaborators for one clean run: a 20-row table, a valid
/// date, an empty sink. Each field can be swapped before building
/// [`Collaborators`].
#[derive(Debug, Clone)]
pub struct ScriptedSet {
    /// Fetches the table.
    pub fetch_table: Arc<ScriptedCollaborator>,
    /// Checks the table.
    pub check_table: Arc<ScriptedCollaborator>,
    /// Fetches the date.
    pub fetch_date: Arc<ScriptedCollaborator>,
    /// Checks the date.
    pub check_date: Arc<ScriptedCollaborator>,
    /// Reshapes the table.
    pub modify_table: Arc<ScriptedCollaborator>,
    /// Reads the sink.
    pub locate: Arc<ScriptedCollaborator>,
    /// Writes the sink.
    pub append: Arc<ScriptedCollaborator>,
    /// Analyzes trends.
    pub analyze: Arc<ScriptedCollaborator>,
}

impl Default for ScriptedSet {
    fn default() -> Self {
        let modified = {
            let mut out = String::new();
            for (i, line) in etf_csv(20).lines().enumerate() {
                if i == 0 {
                    out.push_str("Date,");
                } else {
                    out.push_str(SAMPLE_DATE);
                    out.push(',');
                }
                out.push_str(line);
                out.push('\n');
            }
            out
        };

        Self {
            fetch_table: Arc::new(ScriptedCollaborator::always(
                "fetch_table",
                StageResult::text(etf_csv(20)).with_source("https://example.com/etfs"),
            )),
            check_table: Arc::new(ScriptedCollaborator::always("check_table", StageResult::valid())),
            fetch_date: Arc::new(ScriptedCollaborator::always("fetch_date", StageResult::text(SAMPLE_DATE))),
            check_date: Arc::new(ScriptedCollaborator::always("check_date", StageResult::valid())),
            modify_table: Arc::new(ScriptedCollaborator::always("modify_table", StageResult::text(modified))),
            locate: Arc::new(ScriptedCollaborator::always(
                "locate",
                StageResult::append_point(AppendPoint::new(1).with_header_present(false)),
            )),
            append: Arc::new(ScriptedCollaborator::always("append", StageResult::text("ok"))),
            analyze: Arc::new(ScriptedCollaborator::always(
                "analyze",
                StageResult::text("Volumes rose across the board."),
            )),
        }
    }
}

impl ScriptedSet {
    /// Builds the collaborator set the driver takes. The analysis
    /// collaborator is always included; the pipeline config decides
    /// whether it runs.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            fetch_table: self.fetch_table.clone(),
            check_table: self.check_table.clone(),
            fetch_date: self.fetch_date.clone(),
            check_date: self.check_date.clone(),
            modify_table: self.modify_table.clone(),
            locate: self.locate.clone(),
            append: self.append.clone(),
            analyze: Some(self.analyze.clone() as Arc<dyn Collaborator>),
        }
    }
}
