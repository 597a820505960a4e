//! Testing utilities for sheetflow pipelines.
//!
//! This module provides:
//! - Scripted collaborators that record their requests
//! - Sample tables and a default collaborator set
//! - Assertions for stage results and aborted runs

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_aborted_at, assert_invalid_with, assert_usable};
pub use fixtures::{etf_csv, ScriptedSet, ETF_HEADER, SAMPLE_DATE};
pub use mocks::{ColumnPager, ScriptedCollaborator};
