//! Cell normalization before upload.
//!
//! Spreadsheet clients reinterpret `12.34` in a percent column as a number
//! and `1200000` volumes as numbers with their own formatting. Prefixing a
//! cell with [`TEXT_MARKER`] makes the client keep it as literal text.

use crate::core::TableRow;

/// Leading character that forces a spreadsheet cell to stay text.
pub const TEXT_MARKER: char = '\'';

/// Header indices of the columns the normalizer rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedColumns {
    /// Columns whose trimmed header ends with `%`.
    pub percent: Vec<usize>,
    /// The first column whose trimmed header is `volume` (any case).
    pub volume: Option<usize>,
}

impl NormalizedColumns {
    /// Finds the percent and volume columns in a header row.
    #[must_use]
    pub fn from_header(header: &[String]) -> Self {
        let percent = header
            .iter()
            .enumerate()
            .filter(|(_, h)| h.trim().ends_with('%'))
            .map(|(i, _)| i)
            .collect();
        let volume = header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case("volume"));
        Self { percent, volume }
    }

    /// Returns true if no column needs rewriting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.percent.is_empty() && self.volume.is_none()
    }
}

/// Rewrites percent and volume cells so they survive upload as text.
///
/// The header row is copied unchanged. Running the result through again
/// yields the same rows.
#[must_use]
pub fn normalize_for_upload(rows: &[TableRow]) -> Vec<TableRow> {
    let Some(header) = rows.first() else {
        return Vec::new();
    };
    let columns = NormalizedColumns::from_header(header);

    let mut out = Vec::with_capacity(rows.len());
    out.push(header.clone());

    for row in &rows[1..] {
        let mut row = row.clone();
        for &index in &columns.percent {
            if let Some(cell) = row.get_mut(index) {
                *cell = normalize_percent_cell(cell);
            }
        }
        if let Some(index) = columns.volume {
            if let Some(cell) = row.get_mut(index) {
                *cell = mark_text(cell);
            }
        }
        out.push(row);
    }
    out
}

/// Normalizes one cell of a percent column.
///
/// A plain decimal is read as a fraction and rendered as a percentage with
/// two decimals (`0.05` becomes `'5.00%`). Anything unparsable is only
/// marked.
#[must_use]
pub fn normalize_percent_cell(cell: &str) -> String {
    if cell.is_empty() || cell.ends_with('%') || is_marked(cell) {
        return mark_text(cell);
    }
    match parse_decimal(cell) {
        Some(value) => format!("{TEXT_MARKER}{:.2}%", value * 100.0),
        None => {
            tracing::debug!(cell = %cell, "Percent cell is not numeric; keeping text");
            mark_text(cell)
        }
    }
}

/// Prefixes the marker unless it is already there. Empty cells stay empty.
#[must_use]
pub fn mark_text(cell: &str) -> String {
    if cell.is_empty() || is_marked(cell) {
        cell.to_string()
    } else {
        format!("{TEXT_MARKER}{cell}")
    }
}

/// Returns true if the cell already carries the marker.
#[must_use]
pub fn is_marked(cell: &str) -> bool {
    cell.starts_with(TEXT_MARKER)
}

fn parse_decimal(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
