//! Core domain model types for sheetflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage kind and stage name enums
//! - Structured stage results and their payloads

mod result;
mod status;

pub use result::{AppendPoint, StageContent, StageResult, TableRow};
pub use status::{StageKind, StageName};
