//! Per-run pipeline state: an append-only ledger of accepted stage results.

use crate::core::{StageName, StageResult};
use crate::errors::{LedgerConflictError, UndeclaredDependencyError};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One accepted stage result.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// The stage that produced the result.
    pub stage: StageName,
    /// The accepted result.
    pub result: StageResult,
    /// Attempts consumed.
    pub attempts: usize,
    /// When the result was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Accumulates accepted results for one run, in stage order.
///
/// Entries are never modified or removed. The state lives for one run and is
/// dropped when the run ends, successful or not.
#[derive(Debug)]
pub struct PipelineState {
    run_id: Uuid,
    entries: Vec<LedgerEntry>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// Creates an empty ledger with a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    /// Creates an empty ledger for a given run id.
    #[must_use]
    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
        }
    }

    /// The run this state belongs to.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Appends an accepted result.
    ///
    /// # Errors
    ///
    /// Returns `LedgerConflictError` if the stage was already recorded.
    pub fn record(
        &mut self,
        stage: StageName,
        result: StageResult,
        attempts: usize,
    ) -> Result<&LedgerEntry, LedgerConflictError> {
        if self.contains(stage) {
            return Err(LedgerConflictError::new(stage));
        }
        self.entries.push(LedgerEntry {
            stage,
            result,
            attempts,
            recorded_at: Utc::now(),
        });
        let index = self.entries.len() - 1;
        Ok(&self.entries[index])
    }

    /// Returns true if the stage has been recorded.
    #[must_use]
    pub fn contains(&self, stage: StageName) -> bool {
        self.entries.iter().any(|e| e.stage == stage)
    }

    /// All entries in recording order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// A read-only view limited to the inputs `stage` declares.
    #[must_use]
    pub fn inputs_for(&self, stage: StageName) -> StageInputs<'_> {
        StageInputs {
            state: self,
            stage,
            declared: stage.inputs(),
        }
    }
}

/// Read access to the ledger entries a stage declared as inputs.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    state: &'a PipelineState,
    stage: StageName,
    declared: &'static [StageName],
}

impl<'a> StageInputs<'a> {
    /// Gets the recorded result of a declared input stage.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` if `input` is not declared by the
    /// reading stage.
    pub fn get(&self, input: StageName) -> Result<Option<&'a StageResult>, UndeclaredDependencyError> {
        if !self.declared.contains(&input) {
            return Err(UndeclaredDependencyError::new(self.stage, input));
        }
        Ok(self
            .state
            .entries
            .iter()
            .find(|e| e.stage == input)
            .map(|e| &e.result))
    }

    /// The stage doing the reading.
    #[must_use]
    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// The declared inputs.
    #[must_use]
    pub fn declared(&self) -> &'static [StageName] {
        self.declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends_in_order() {
        let mut state = PipelineState::new();
        state.record(StageName::FetchTable, StageResult::text("a"), 1).unwrap();
        state.record(StageName::CheckTable, StageResult::valid(), 2).unwrap();

        let stages: Vec<_> = state.entries().iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![StageName::FetchTable, StageName::CheckTable]);
        assert_eq!(state.entries()[1].attempts, 2);
    }

    #[test]
    fn test_record_twice_conflicts() {
        let mut state = PipelineState::new();
        state.record(StageName::FetchDate, StageResult::text("2025-06-20 10:00:00"), 1).unwrap();

        let err = state
            .record(StageName::FetchDate, StageResult::text("later"), 1)
            .unwrap_err();
        assert_eq!(err.stage, StageName::FetchDate);
        assert_eq!(state.entries().len(), 1);
        assert_eq!(
            state.entries()[0].result.content.as_text(),
            Some("2025-06-20 10:00:00")
        );
    }

    #[test]
    fn test_inputs_enforce_declarations() {
        let mut state = PipelineState::new();
        state.record(StageName::FetchTable, StageResult::text("csv"), 1).unwrap();
        state.record(StageName::FetchDate, StageResult::text("date"), 1).unwrap();

        let inputs = state.inputs_for(StageName::CheckTable);
        assert_eq!(
            inputs.get(StageName::FetchTable).unwrap().and_then(|r| r.content.as_text()),
            Some("csv")
        );

        let err = inputs.get(StageName::FetchDate).unwrap_err();
        assert_eq!(err.stage, StageName::CheckTable);
        assert_eq!(err.key, StageName::FetchDate);
    }

    #[test]
    fn test_declared_but_missing_input_is_none() {
        let state = PipelineState::new();
        let inputs = state.inputs_for(StageName::ModifyTable);
        assert!(inputs.get(StageName::FetchDate).unwrap().is_none());
    }

    #[test]
    fn test_run_id_is_stable() {
        let id = Uuid::new_v4();
        let state = PipelineState::with_run_id(id);
        assert_eq!(state.run_id(), id);
    }
}
