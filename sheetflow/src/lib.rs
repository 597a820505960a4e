//! # Sheetflow
//!
//! A retry-gated stage pipeline that fetches a table, validates it, adds a
//! date column and appends it to a spreadsheet-like sink.
//!
//! Sheetflow provides:
//!
//! - **Result gating**: every collaborator answer is checked before the next
//!   stage sees it, and invalid answers are retried within a budget
//! - **Row-group validation**: append points must follow the fixed batch
//!   pattern of earlier runs
//! - **CSV normalization**: percent and volume cells are rewritten so a
//!   spreadsheet keeps them as text
//! - **Pluggable collaborators**: HTTP agents, local checkers and CSV files
//!   behind one async trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sheetflow::prelude::*;
//!
//! let jobs = JobsFile::from_path(Path::new("jobs.json"))?;
//! for job in &jobs.jobs {
//!     let pipeline = TablePipeline::from_job(job)?
//!         .with_event_sink(Arc::new(LoggingEventSink::default()));
//!     let report = pipeline.run().await?;
//!     println!("appended {} rows at row {}", report.rows_appended, report.append_point.next_row);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod table;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{Collaborator, CollaboratorSpec, FnCollaborator, TaskRequest};
    pub use crate::config::{
        CollaboratorSet, JobConfig, JobsFile, PipelineConfig, SnapshotPaths, StagePolicies,
        TaskTemplates,
    };
    pub use crate::core::{AppendPoint, StageContent, StageKind, StageName, StageResult, TableRow};
    pub use crate::errors::{
        AbortReason, CollaboratorError, ConfigError, FailureKind, PipelineError, SheetflowError,
    };
    pub use crate::events::{
        CollectingEventSink, EventKind, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        is_in_expected_group, Collaborators, Decision, Gate, PipelineReport, ResultGate,
        RetryPolicy, RowGroupValidator, TablePipeline,
    };
    pub use crate::table::{normalize_for_upload, parse_rows, rows_to_string, TableShape};
}
