//! Append-point validation against fixed-size row batches.
//!
//! Every successful append writes a header row the first time and then one
//! batch of data rows per run, so the valid "next empty row" positions form
//! the sequence `1, 1 + header_rows + batch_size, ...` stepping by
//! `batch_size`. With the defaults that is 1, 22, 42, 62, ...
//!
//! A sink configured with zero header rows never gets a header, so its
//! pattern is 1, 1 + batch_size, ... and the header flag a locator reports
//! carries no information.

use crate::core::AppendPoint;
use serde::{Deserialize, Serialize};

/// Default number of data rows written per append.
pub const DEFAULT_BATCH_SIZE: u64 = 20;

/// Default number of header rows written on the first append.
pub const DEFAULT_HEADER_ROWS: u64 = 1;

/// Checks whether an observed append point fits the batch pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowGroupValidator {
    /// Data rows per append.
    pub batch_size: u64,
    /// Header rows written before the first batch.
    pub header_rows: u64,
}

impl Default for RowGroupValidator {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            header_rows: DEFAULT_HEADER_ROWS,
        }
    }
}

impl RowGroupValidator {
    /// Creates a validator for the given batch size and one header row.
    #[must_use]
    pub fn new(batch_size: u64) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Sets the number of header rows.
    #[must_use]
    pub fn with_header_rows(mut self, header_rows: u64) -> Self {
        self.header_rows = header_rows;
        self
    }

    /// The first valid append point after the initial write, or `None` when
    /// it lies beyond `u64::MAX`.
    #[must_use]
    pub fn first_group_row(&self) -> Option<u64> {
        self.header_rows.checked_add(self.batch_size)?.checked_add(1)
    }

    /// Returns true if the sink writes a header on the first append.
    #[must_use]
    pub fn writes_header(&self) -> bool {
        self.header_rows > 0
    }

    /// Returns true if the point's header flag disagrees with its row.
    ///
    /// Always false for a headerless sink.
    #[must_use]
    pub fn header_contradicts(&self, point: &AppendPoint) -> bool {
        self.writes_header() && point.is_contradictory()
    }

    /// Returns true if `n` is a valid next empty row.
    ///
    /// A zero batch size accepts only the empty sink.
    #[must_use]
    pub fn is_in_expected_group(&self, n: u64) -> bool {
        if n == 1 {
            return true;
        }
        let Some(first) = self.first_group_row() else {
            return false;
        };
        if self.batch_size == 0 || n < first {
            return false;
        }
        (n - first) % self.batch_size == 0
    }
}

/// Checks `n` against the default 20-row batch pattern.
#[must_use]
pub fn is_in_expected_group(n: u64) -> bool {
    RowGroupValidator::default().is_in_expected_group(n)
}
