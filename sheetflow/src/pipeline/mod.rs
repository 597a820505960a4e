//! Pipeline gating and execution.
//!
//! This module provides:
//! - The result gate and its retry controller
//! - Row-group validation of append points
//! - The per-run ledger of accepted results
//! - The table pipeline driver

mod driver;
mod gate;
mod retry;
mod row_group;
mod state;


pub use driver::{Collaborators, PipelineReport, StageReport, TablePipeline};
pub use gate::{Decision, Gate, ResultGate};
pub use retry::{run_with_retry, GatedResult, RetryAbort, RetryPolicy};
pub use row_group::{is_in_expected_group, RowGroupValidator, DEFAULT_BATCH_SIZE, DEFAULT_HEADER_ROWS};
pub use state::{LedgerEntry, PipelineState, StageInputs};
