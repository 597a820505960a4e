//! Table shape checks and the date-column transform.

use crate::core::TableRow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expected shape of a fetched table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableShape {
    /// Header cells that must be present (compared case-insensitively).
    pub required_headers: Vec<String>,
    /// Exact number of data rows, if fixed.
    pub expected_data_rows: Option<usize>,
    /// Minimum number of data rows.
    pub min_data_rows: usize,
}

impl TableShape {
    /// Creates a shape with no requirements.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a header cell.
    #[must_use]
    pub fn require_header(mut self, header: impl Into<String>) -> Self {
        self.required_headers.push(header.into());
        self
    }

    /// Requires an exact number of data rows.
    #[must_use]
    pub fn with_data_rows(mut self, rows: usize) -> Self {
        self.expected_data_rows = Some(rows);
        self
    }

    /// Checks the rows against the shape. The error is a reason suitable for
    /// an invalid checker result.
    pub fn check(&self, rows: &[TableRow]) -> Result<(), String> {
        let Some(header) = rows.first() else {
            return Err("table is empty".to_string());
        };

        let missing: Vec<&str> = self
            .required_headers
            .iter()
            .filter(|required| !header.iter().any(|h| h.trim().eq_ignore_ascii_case(required.trim())))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing header(s): {}", missing.join(", ")));
        }

        let data_rows = rows.len() - 1;
        if let Some(expected) = self.expected_data_rows {
            if data_rows != expected {
                return Err(format!("expected {expected} data rows, found {data_rows}"));
            }
        }
        if data_rows < self.min_data_rows {
            return Err(format!(
                "expected at least {} data rows, found {data_rows}",
                self.min_data_rows
            ));
        }

        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.len() != header.len())
        {
            return Err(format!(
                "row {} has {} cells, header has {}",
                index + 1,
                row.len(),
                header.len()
            ));
        }
        Ok(())
    }
}

/// Inserts a date column as the first column and applies header renames.
///
/// The header row gets `date_header`; every data row gets `date`.
#[must_use]
pub fn add_date_column(
    rows: &[TableRow],
    date_header: &str,
    date: &str,
    renames: &HashMap<String, String>,
) -> Vec<TableRow> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let mut out = Vec::with_capacity(row.len() + 1);
            if index == 0 {
                out.push(date_header.to_string());
                out.extend(
                    row.iter()
                        .map(|h| renames.get(h.trim()).cloned().unwrap_or_else(|| h.clone())),
                );
            } else {
                out.push(date.to_string());
                out.extend(row.iter().cloned());
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(data: &[&[&str]]) -> Vec<TableRow> {
        data.iter()
            .map(|r| r.iter().map(|c| (*c).to_string()).collect())
            .collect()
    }

    #[test]
    fn test_shape_accepts_matching_table() {
        let shape = TableShape::new().require_header("symbol").with_data_rows(2);
        let table = rows(&[&["Symbol", "Price"], &["SPY", "1"], &["QQQ", "2"]]);
        assert_eq!(shape.check(&table), Ok(()));
    }

    #[test]
    fn test_shape_reports_row_count() {
        let shape = TableShape::new().with_data_rows(20);
        let table = rows(&[&["Symbol"], &["SPY"]]);
        assert_eq!(
            shape.check(&table),
            Err("expected 20 data rows, found 1".to_string())
        );
    }

    #[test]
    fn test_shape_reports_missing_headers_and_width() {
        let shape = TableShape::new().require_header("Volume").require_header("Symbol");
        let table = rows(&[&["Symbol", "Price"], &["SPY", "1"]]);
        assert_eq!(shape.check(&table), Err("missing header(s): Volume".to_string()));

        let ragged = rows(&[&["Symbol", "Price"], &["SPY"]]);
        assert_eq!(
            TableShape::new().check(&ragged),
            Err("row 2 has 1 cells, header has 2".to_string())
        );
        assert!(TableShape::new().check(&[]).is_err());
    }

    #[test]
    fn test_add_date_column() {
        let mut renames = HashMap::new();
        renames.insert("Chg %".to_string(), "Change %".to_string());

        let table = rows(&[&["Symbol", "Chg %"], &["SPY", "0.1"]]);
        let out = add_date_column(&table, "Date", "2025-06-20 10:00:00", &renames);

        assert_eq!(
            out,
            rows(&[
                &["Date", "Symbol", "Change %"],
                &["2025-06-20 10:00:00", "SPY", "0.1"],
            ])
        );
    }
}
