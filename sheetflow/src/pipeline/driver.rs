//! The table pipeline driver.
//!
//! Runs the fixed stage sequence
//! `FetchTable → CheckTable → FetchDate → CheckDate → ModifyTable →
//! LocateAppendPoint → NormalizeAndAppend (→ AnalyzeTrends)`, every stage
//! through [`run_with_retry`], recording accepted results in a
//! [`PipelineState`].

use super::gate::{Gate, ResultGate};
use super::retry::{run_with_retry, GatedResult, RetryPolicy};
use super::state::PipelineState;
use crate::collaborators::{Collaborator, TaskRequest};
use crate::config::{CollaboratorSet, JobConfig, PipelineConfig};
use crate::core::{AppendPoint, StageContent, StageKind, StageName, StageResult, TableRow};
use crate::errors::{ConfigError, PipelineError};
use crate::events::{EventKind, EventSink, NoOpEventSink, PipelineEvent};
use crate::table;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The collaborator behind each stage.
#[derive(Clone)]
pub struct Collaborators {
    /// Fetches the table.
    pub fetch_table: Arc<dyn Collaborator>,
    /// Checks the table.
    pub check_table: Arc<dyn Collaborator>,
    /// Fetches the date stamp.
    pub fetch_date: Arc<dyn Collaborator>,
    /// Checks the date stamp.
    pub check_date: Arc<dyn Collaborator>,
    /// Reshapes the table.
    pub modify_table: Arc<dyn Collaborator>,
    /// Reads the sink.
    pub locate: Arc<dyn Collaborator>,
    /// Writes the sink.
    pub append: Arc<dyn Collaborator>,
    /// Analyzes trends.
    pub analyze: Option<Arc<dyn Collaborator>>,
}

impl Collaborators {
    /// Builds every collaborator of a job.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` raised while building.
    pub fn from_specs(set: &CollaboratorSet) -> Result<Self, ConfigError> {
        Ok(Self {
            fetch_table: set.fetch_table.build("fetch_table")?,
            check_table: set.check_table.build("check_table")?,
            fetch_date: set.fetch_date.build("fetch_date")?,
            check_date: set.check_date.build("check_date")?,
            modify_table: set.modify_table.build("modify_table")?,
            locate: set.locate.build("locate")?,
            append: set.append.build("append")?,
            analyze: set.analyze.as_ref().map(|spec| spec.build("analyze")).transpose()?,
        })
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("fetch_table", &self.fetch_table.name())
            .field("check_table", &self.check_table.name())
            .field("fetch_date", &self.fetch_date.name())
            .field("check_date", &self.check_date.name())
            .field("modify_table", &self.modify_table.name())
            .field("locate", &self.locate.name())
            .field("append", &self.append.name())
            .field("analyze", &self.analyze.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

/// Attempts and timing of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// The stage.
    pub stage: StageName,
    /// Attempts consumed.
    pub attempts: usize,
    /// Reasons given for each retry.
    pub retry_reasons: Vec<String>,
    /// Wall time across all attempts, in milliseconds.
    pub duration_ms: f64,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    /// The pipeline name.
    pub pipeline: String,
    /// The run id.
    pub run_id: Uuid,
    /// Completed stages in order. Fetch stages run inside their check stage
    /// and share its entry.
    pub stages: Vec<StageReport>,
    /// Retries consumed across the run. A fetch/check pair counts once.
    pub total_retries: usize,
    /// Where the rows were appended.
    pub append_point: AppendPoint,
    /// Data rows appended (header excluded).
    pub rows_appended: usize,
    /// Whether the header row was sent along with the data.
    pub header_written: bool,
    /// Trend summary, when analysis ran and succeeded.
    pub summary: Option<String>,
    /// Why analysis failed, when it ran and failed.
    pub analysis_error: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall time in milliseconds.
    pub duration_ms: f64,
}

impl PipelineReport {
    /// The report of one stage, if it completed.
    #[must_use]
    pub fn stage(&self, stage: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Attempts a stage consumed; 0 if it did not run.
    #[must_use]
    pub fn attempts(&self, stage: StageName) -> usize {
        self.stage(stage).map_or(0, |s| s.attempts)
    }
}

/// Per-run bookkeeping.
struct Run {
    state: PipelineState,
    stages: Vec<StageReport>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::new(),
            stages: Vec::new(),
        }
    }

    fn report(&mut self, stage: StageName, gated: &GatedResult, duration_ms: f64) {
        self.stages.push(StageReport {
            stage,
            attempts: gated.attempts,
            retry_reasons: gated.retry_reasons.clone(),
            duration_ms,
        });
    }
}

struct Appended {
    rows: usize,
    header_written: bool,
}

struct Outcome {
    append_point: AppendPoint,
    appended: Appended,
    summary: Option<String>,
    analysis_error: Option<String>,
}

/// Drives one table through fetch, validation, reshaping and append.
pub struct TablePipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for TablePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TablePipeline")
            .field("name", &self.config.name)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

impl TablePipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration is invalid or analysis
    /// is enabled without an analysis collaborator.
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.analyze && collaborators.analyze.is_none() {
            return Err(ConfigError::validation(format!(
                "pipeline '{}' enables analysis but has no analyze collaborator",
                config.name
            )));
        }
        Ok(Self {
            config,
            collaborators,
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Creates a pipeline from a job description.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the job is invalid or a collaborator
    /// cannot be built.
    pub fn from_job(job: &JobConfig) -> Result<Self, ConfigError> {
        job.validate()?;
        Self::new(job.pipeline.clone(), Collaborators::from_specs(&job.collaborators)?)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline once.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::StageAborted` when a stage is aborted, and
    /// other variants for local failures (snapshots, malformed CSV). Nothing
    /// downstream of the failing stage runs.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let mut run = Run::new();
        let run_id = run.state.run_id();
        let started_at = Utc::now();
        let started = Instant::now();

        info!(pipeline = %self.config.name, run_id = %run_id, "Pipeline started");
        self.events.emit(
            &self
                .event(EventKind::PipelineStarted, run_id)
                .with_data(serde_json::json!({ "source": self.config.source })),
        );

        match self.execute(&mut run).await {
            Ok(outcome) => {
                let report = PipelineReport {
                    pipeline: self.config.name.clone(),
                    run_id,
                    total_retries: run.stages.iter().map(|s| s.attempts.saturating_sub(1)).sum(),
                    stages: run.stages,
                    append_point: outcome.append_point,
                    rows_appended: outcome.appended.rows,
                    header_written: outcome.appended.header_written,
                    summary: outcome.summary,
                    analysis_error: outcome.analysis_error,
                    started_at,
                    duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                };
                info!(
                    pipeline = %self.config.name,
                    run_id = %run_id,
                    total_retries = report.total_retries,
                    rows_appended = report.rows_appended,
                    next_row = report.append_point.next_row,
                    duration_ms = report.duration_ms,
                    "Pipeline completed"
                );
                self.events.emit(&self.event(EventKind::PipelineCompleted, run_id).with_data(
                    serde_json::json!({
                        "total_retries": report.total_retries,
                        "rows_appended": report.rows_appended,
                        "next_row": report.append_point.next_row,
                    }),
                ));
                Ok(report)
            }
            Err(err) => {
                error!(pipeline = %self.config.name, run_id = %run_id, error = %err, "Pipeline failed");
                let mut event = self
                    .event(EventKind::PipelineFailed, run_id)
                    .with_data(serde_json::json!(err.to_dict()));
                if let Some(stage) = err.stage() {
                    event = event.with_stage(stage);
                }
                self.events.emit(&event);
                Err(err)
            }
        }
    }

    async fn execute(&self, run: &mut Run) -> Result<Outcome, PipelineError> {
        let c = &self.collaborators;

        self.fetch_and_check(
            run,
            StageName::FetchTable,
            StageName::CheckTable,
            c.fetch_table.as_ref(),
            c.check_table.as_ref(),
            self.config.snapshots.raw.as_deref(),
        )
        .await?;

        let fetched_date = self
            .fetch_and_check(
                run,
                StageName::FetchDate,
                StageName::CheckDate,
                c.fetch_date.as_ref(),
                c.check_date.as_ref(),
                None,
            )
            .await?;
        let date = fetched_date
            .content
            .as_text()
            .map(|d| d.trim().to_string())
            .ok_or_else(|| PipelineError::UnexpectedContent {
                stage: StageName::FetchDate,
                message: format!("expected a text date stamp, got {}", fetched_date.content.label()),
            })?;

        self.modify_table(run, &date).await?;
        let append_point = self.locate(run).await?;
        let baseline = if self.config.analyze {
            self.load_baseline().await?
        } else {
            None
        };
        let appended = self.normalize_and_append(run).await?;

        let (summary, analysis_error) = if self.config.analyze {
            self.analyze(run, &date, append_point, appended.rows, baseline).await?
        } else {
            (None, None)
        };

        Ok(Outcome {
            append_point,
            appended,
            summary,
            analysis_error,
        })
    }

    /// Runs a fetch/check pair as one gated stage and records both results.
    /// Returns the accepted fetch result.
    async fn fetch_and_check(
        &self,
        run: &mut Run,
        fetch_stage: StageName,
        check_stage: StageName,
        fetch: &dyn Collaborator,
        check: &dyn Collaborator,
        raw_snapshot: Option<&Path>,
    ) -> Result<StageResult, PipelineError> {
        let policy = self.config.policies.for_stage(check_stage);
        let gate = ResultGate::for_policy(&policy);
        let snapshot_error = Mutex::new(None);

        let outcome = self
            .gated(run.state.run_id(), check_stage, &policy, &gate, |attempt| {
                self.fetch_then_check(
                    fetch_stage,
                    check_stage,
                    fetch,
                    check,
                    attempt,
                    raw_snapshot,
                    &snapshot_error,
                )
            })
            .await;

        if let Some(err) = snapshot_error.into_inner() {
            return Err(err);
        }
        let (gated, duration_ms) = outcome?;

        let (fetched, checked) = split_checked(gated.result.clone());
        run.state.record(fetch_stage, fetched.clone(), gated.attempts)?;
        run.state.record(check_stage, checked, gated.attempts)?;
        run.report(check_stage, &gated, duration_ms);
        Ok(fetched)
    }

    /// One attempt of a fetch/check pair. The returned result carries the
    /// fetched content and the checker's verdict.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_then_check(
        &self,
        fetch_stage: StageName,
        check_stage: StageName,
        fetch: &dyn Collaborator,
        check: &dyn Collaborator,
        attempt: usize,
        raw_snapshot: Option<&Path>,
        snapshot_error: &Mutex<Option<PipelineError>>,
    ) -> StageResult {
        let fetched = self
            .call(fetch, self.request(fetch_stage, attempt, &[]), StageKind::Fetch)
            .await;
        if !fetched.is_usable() {
            return fetched;
        }

        if let (Some(path), Some(text)) = (raw_snapshot, fetched.content.as_text()) {
            if let Err(source) = table::write_snapshot(path, text).await {
                let message = format!("failed to write snapshot '{}': {source}", path.display());
                *snapshot_error.lock() = Some(PipelineError::Snapshot {
                    path: path.to_path_buf(),
                    source,
                });
                return StageResult::failed(message).with_origin(StageKind::Fetch);
            }
        }

        let extra: Vec<(&'static str, String)> = match fetched.content.as_text() {
            Some(text) if check_stage == StageName::CheckDate => vec![("date", text.trim().to_string())],
            _ => Vec::new(),
        };
        let request = self
            .request(check_stage, attempt, &extra)
            .with_input(fetch_stage, fetched.content.clone());
        let checked = self.call(check, request, StageKind::Checker).await;

        StageResult {
            content: fetched.content,
            source_reference: fetched.source_reference,
            validity: checked.validity,
            error_message: checked.error_message,
            reason_message: checked.reason_message,
            origin: StageKind::Checker,
        }
    }

    async fn modify_table(&self, run: &mut Run, date: &str) -> Result<(), PipelineError> {
        let stage = StageName::ModifyTable;
        let inputs = run.state.inputs_for(stage);
        let table_content = required(inputs.get(StageName::FetchTable)?, stage, StageName::FetchTable)?
            .content
            .clone();
        let date_content = required(inputs.get(StageName::FetchDate)?, stage, StageName::FetchDate)?
            .content
            .clone();

        let policy = self.config.policies.for_stage(stage);
        let gate = ResultGate::for_policy(&policy);
        let collaborator = self.collaborators.modify_table.as_ref();
        let (gated, duration_ms) = self
            .gated(run.state.run_id(), stage, &policy, &gate, |attempt| {
                let request = self
                    .request(stage, attempt, &[("date", date.to_string())])
                    .with_input(StageName::FetchTable, table_content.clone())
                    .with_input(StageName::FetchDate, date_content.clone());
                self.call(collaborator, request, StageKind::Transform)
            })
            .await?;

        let rows = table_rows(stage, &gated.result.content)?;
        if rows.len() < 2 {
            return Err(PipelineError::UnexpectedContent {
                stage,
                message: "modified table has no data rows".to_string(),
            });
        }

        if let Some(path) = &self.config.snapshots.modified {
            let csv = match &gated.result.content {
                StageContent::Text(text) => text.clone(),
                _ => table::rows_to_string(&rows).map_err(|source| PipelineError::MalformedCsv { stage, source })?,
            };
            table::write_snapshot(path, &csv)
                .await
                .map_err(|source| PipelineError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
        }

        let mut recorded = StageResult::rows(rows).with_origin(StageKind::Transform);
        recorded.source_reference = gated.result.source_reference.clone();
        run.state.record(stage, recorded, gated.attempts)?;
        run.report(stage, &gated, duration_ms);
        Ok(())
    }

    async fn locate(&self, run: &mut Run) -> Result<AppendPoint, PipelineError> {
        let stage = StageName::LocateAppendPoint;
        let policy = self.config.policies.for_stage(stage);
        let gate = ResultGate::for_policy(&policy).with_row_groups(self.config.row_groups);

        let (gated, duration_ms) = self
            .gated(run.state.run_id(), stage, &policy, &gate, |attempt| self.locate_once(attempt))
            .await?;

        let point = gated
            .result
            .content
            .append_point()
            .ok_or_else(|| PipelineError::UnexpectedContent {
                stage,
                message: format!("expected an append point, got {}", gated.result.content.label()),
            })?;
        info!(
            pipeline = %self.config.name,
            next_row = point.next_row,
            header_present = ?point.header_present,
            "Located append point"
        );

        let mut recorded = StageResult::append_point(point).with_origin(StageKind::Locate);
        recorded.source_reference = gated.result.source_reference.clone();
        run.state.record(stage, recorded, gated.attempts)?;
        run.report(stage, &gated, duration_ms);
        Ok(point)
    }

    /// One locate attempt. A locator may answer with the append point
    /// directly, or with pages of the sink's first column, which are read
    /// until a short page.
    async fn locate_once(&self, attempt: usize) -> StageResult {
        let stage = StageName::LocateAppendPoint;
        let collaborator = self.collaborators.locate.as_ref();
        let page_size = self.config.scan_page_size;
        let mut start_row: u64 = 1;
        let mut total: u64 = 0;
        let mut source = None;

        for page in 0..self.config.max_scan_pages {
            let end_row = start_row.saturating_add(page_size - 1);
            let request = self
                .request(
                    stage,
                    attempt,
                    &[("start_row", start_row.to_string()), ("end_row", end_row.to_string())],
                )
                .with_payload(StageContent::RowIndex(start_row));
            let result = self.call(collaborator, request, StageKind::Locate).await;

            if !result.is_usable() || (page == 0 && result.content.append_point().is_some()) {
                return result;
            }
            let Some(len) = result.content.column_len() else {
                if page == 0 {
                    return result;
                }
                return StageResult::invalid(format!(
                    "page starting at row {start_row} returned {} instead of a column page",
                    result.content.label()
                ))
                .with_origin(StageKind::Locate);
            };

            let len = u64::try_from(len).unwrap_or(u64::MAX);
            if len > page_size {
                return StageResult::invalid(format!(
                    "page starting at row {start_row} returned {len} values for a window of {page_size}"
                ))
                .with_origin(StageKind::Locate);
            }
            debug!(pipeline = %self.config.name, start_row, len, "Read column page");

            total = total.saturating_add(len);
            if source.is_none() {
                source = result.source_reference;
            }
            if len < page_size {
                let point = AppendPoint::new(total.saturating_add(1)).with_header_present(total > 0);
                let mut located = StageResult::append_point(point).with_origin(StageKind::Locate);
                located.source_reference = source;
                return located;
            }
            start_row = match start_row.checked_add(page_size) {
                Some(next) => next,
                None => {
                    return StageResult::invalid("column pages run past the last addressable row")
                        .with_origin(StageKind::Locate)
                }
            };
        }

        StageResult::invalid(format!(
            "no end of data within {} pages of {page_size} rows",
            self.config.max_scan_pages
        ))
        .with_origin(StageKind::Locate)
    }

    async fn normalize_and_append(&self, run: &mut Run) -> Result<Appended, PipelineError> {
        let stage = StageName::NormalizeAndAppend;
        let inputs = run.state.inputs_for(stage);
        let modified = required(inputs.get(StageName::ModifyTable)?, stage, StageName::ModifyTable)?;
        let located = required(
            inputs.get(StageName::LocateAppendPoint)?,
            stage,
            StageName::LocateAppendPoint,
        )?;
        let rows = table_rows(StageName::ModifyTable, &modified.content)?;
        let point_content = located.content.clone();
        let point = point_content
            .append_point()
            .ok_or_else(|| PipelineError::UnexpectedContent {
                stage: StageName::LocateAppendPoint,
                message: format!("expected an append point, got {}", point_content.label()),
            })?;

        let normalized = table::normalize_for_upload(&rows);
        let data_rows = normalized.len().saturating_sub(1);
        // A headerless sink never receives the header row.
        let header_present = match point.header_present {
            _ if !self.config.row_groups.writes_header() => true,
            Some(present) => present,
            None => {
                let inferred = point.next_row > 1;
                warn!(
                    pipeline = %self.config.name,
                    next_row = point.next_row,
                    header_present = inferred,
                    "Locator did not report a header flag; inferring it from the row index"
                );
                inferred
            }
        };
        let outgoing: Vec<TableRow> = if header_present {
            normalized.iter().skip(1).cloned().collect()
        } else {
            normalized.clone()
        };

        let policy = self.config.policies.for_stage(stage);
        let gate = ResultGate::for_policy(&policy);
        let collaborator = self.collaborators.append.as_ref();
        let (gated, duration_ms) = self
            .gated(run.state.run_id(), stage, &policy, &gate, |attempt| {
                let request = self
                    .request(
                        stage,
                        attempt,
                        &[("row", point.next_row.to_string()), ("rows", data_rows.to_string())],
                    )
                    .with_input(StageName::LocateAppendPoint, point_content.clone())
                    .with_payload(StageContent::Rows(outgoing.clone()));
                self.call(collaborator, request, StageKind::Append)
            })
            .await?;

        if let Some(path) = &self.config.snapshots.history {
            let csv = table::rows_to_string(&normalized).map_err(|source| PipelineError::MalformedCsv { stage, source })?;
            table::append_csv(path, &csv)
                .await
                .map_err(|source| PipelineError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
        }

        run.state.record(stage, gated.result.clone(), gated.attempts)?;
        run.report(stage, &gated, duration_ms);
        info!(
            pipeline = %self.config.name,
            rows = data_rows,
            next_row = point.next_row,
            header_written = !header_present,
            "Appended table"
        );
        Ok(Appended {
            rows: data_rows,
            header_written: !header_present,
        })
    }

    /// Reads the history file as it stands before this run appends to it.
    async fn load_baseline(&self) -> Result<Option<Vec<TableRow>>, PipelineError> {
        let Some(path) = &self.config.snapshots.history else {
            return Ok(None);
        };
        let text = table::read_snapshot(path)
            .await
            .map_err(|source| PipelineError::Snapshot {
                path: path.clone(),
                source,
            })?;
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let rows = table::parse_rows(&text).map_err(|source| PipelineError::MalformedCsv {
            stage: StageName::AnalyzeTrends,
            source,
        })?;
        debug!(pipeline = %self.config.name, rows = rows.len(), "Loaded analysis baseline");
        Ok(Some(rows))
    }

    /// Runs trend analysis against the earlier history rows, if any. An
    /// aborted analysis is reported, not raised: the rows are already
    /// appended by then.
    async fn analyze(
        &self,
        run: &mut Run,
        date: &str,
        point: AppendPoint,
        rows: usize,
        baseline: Option<Vec<TableRow>>,
    ) -> Result<(Option<String>, Option<String>), PipelineError> {
        let stage = StageName::AnalyzeTrends;
        let Some(collaborator) = self.collaborators.analyze.as_deref() else {
            return Ok((None, Some("no analysis collaborator configured".to_string())));
        };

        let inputs = run.state.inputs_for(stage);
        let mut attachments: Vec<(StageName, StageContent)> = Vec::new();
        for input in stage.inputs() {
            let entry = required(inputs.get(*input)?, stage, *input)?;
            attachments.push((*input, entry.content.clone()));
        }

        let policy = self.config.policies.for_stage(stage);
        let gate = ResultGate::for_policy(&policy);
        let outcome = self
            .gated(run.state.run_id(), stage, &policy, &gate, |attempt| {
                let mut request = self.request(
                    stage,
                    attempt,
                    &[
                        ("date", date.to_string()),
                        ("row", point.next_row.to_string()),
                        ("rows", rows.to_string()),
                    ],
                );
                for (input, content) in &attachments {
                    request = request.with_input(*input, content.clone());
                }
                if let Some(earlier) = &baseline {
                    request = request.with_payload(StageContent::Rows(earlier.clone()));
                }
                self.call(collaborator, request, StageKind::Advisory)
            })
            .await;

        match outcome {
            Ok((gated, duration_ms)) => {
                let summary = gated.result.content.as_text().map(str::to_string);
                run.state.record(stage, gated.result.clone(), gated.attempts)?;
                run.report(stage, &gated, duration_ms);
                Ok((summary, None))
            }
            Err(PipelineError::StageAborted { reason, .. }) => {
                warn!(pipeline = %self.config.name, reason = %reason, "Trend analysis failed; rows stay appended");
                Ok((None, Some(reason.to_string())))
            }
            Err(other) => Err(other),
        }
    }

    /// Runs one stage through the retry controller, emitting lifecycle
    /// events around it.
    async fn gated<F, Fut>(
        &self,
        run_id: Uuid,
        stage: StageName,
        policy: &RetryPolicy,
        gate: &dyn Gate,
        mut invoker: F,
    ) -> Result<(GatedResult, f64), PipelineError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = StageResult>,
    {
        let started = Instant::now();
        let outcome = run_with_retry(policy, gate, |attempt| {
            let kind = if attempt == 0 {
                EventKind::StageStarted
            } else {
                EventKind::StageRetrying
            };
            self.events.emit(
                &self
                    .event(kind, run_id)
                    .with_stage(stage)
                    .with_attempt(attempt + 1),
            );
            invoker(attempt)
        })
        .await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(gated) => {
                debug!(
                    pipeline = %self.config.name,
                    stage = %stage,
                    attempts = gated.attempts,
                    duration_ms,
                    "Stage completed"
                );
                self.events.emit(
                    &self
                        .event(EventKind::StageCompleted, run_id)
                        .with_stage(stage)
                        .with_attempt(gated.attempts)
                        .with_data(serde_json::json!({ "retry_reasons": gated.retry_reasons })),
                );
                Ok((gated, duration_ms))
            }
            Err(abort) => {
                warn!(
                    pipeline = %self.config.name,
                    stage = %stage,
                    attempts = abort.attempts,
                    reason = %abort.reason,
                    "Stage aborted"
                );
                self.events.emit(
                    &self
                        .event(EventKind::StageAborted, run_id)
                        .with_stage(stage)
                        .with_attempt(abort.attempts)
                        .with_data(serde_json::json!({
                            "kind": abort.reason.kind,
                            "reason": abort.reason.message,
                            "retry_reasons": abort.retry_reasons,
                        })),
                );
                Err(PipelineError::aborted(stage, abort.reason, abort.attempts))
            }
        }
    }

    /// Invokes a collaborator, folding transport errors into the result.
    async fn call(&self, collaborator: &dyn Collaborator, request: TaskRequest, origin: StageKind) -> StageResult {
        match collaborator.invoke(&request).await {
            Ok(result) => result.with_origin(origin),
            Err(err) => {
                debug!(
                    collaborator = collaborator.name(),
                    stage = %request.stage,
                    attempt = request.attempt,
                    error = %err,
                    "Collaborator call failed"
                );
                StageResult::failed(err.to_string()).with_origin(origin)
            }
        }
    }

    fn request(&self, stage: StageName, attempt: usize, extra: &[(&'static str, String)]) -> TaskRequest {
        let mut vars = BTreeMap::new();
        vars.insert("name", self.config.name.clone());
        vars.insert("source", self.config.source.clone());
        vars.insert("attempt", (attempt + 1).to_string());
        for (key, value) in extra {
            vars.insert(*key, value.clone());
        }
        TaskRequest::new(stage, self.config.tasks.fill(stage, &vars)).with_attempt(attempt + 1)
    }

    fn event(&self, kind: EventKind, run_id: Uuid) -> PipelineEvent {
        PipelineEvent::new(kind, self.config.name.as_str(), run_id)
    }
}

fn required(
    entry: Option<&StageResult>,
    reader: StageName,
    input: StageName,
) -> Result<&StageResult, PipelineError> {
    entry.ok_or_else(|| PipelineError::UnexpectedContent {
        stage: reader,
        message: format!("input '{input}' has not been recorded"),
    })
}

/// Reads a table payload as rows.
fn table_rows(stage: StageName, content: &StageContent) -> Result<Vec<TableRow>, PipelineError> {
    match content {
        StageContent::Text(text) => {
            table::parse_rows(text).map_err(|source| PipelineError::MalformedCsv { stage, source })
        }
        StageContent::Rows(rows) => Ok(rows.clone()),
        other => Err(PipelineError::UnexpectedContent {
            stage,
            message: format!("expected CSV text or rows, got {}", other.label()),
        }),
    }
}

/// Splits an accepted fetch/check result into its two ledger entries.
fn split_checked(result: StageResult) -> (StageResult, StageResult) {
    let fetched = StageResult {
        content: result.content,
        source_reference: result.source_reference,
        ..StageResult::default()
    }
    .with_origin(StageKind::Fetch);
    let checked = StageResult {
        validity: result.validity,
        reason_message: result.reason_message,
        ..StageResult::default()
    }
    .with_origin(StageKind::Checker);
    (fetched, checked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_checked() {
        let merged = StageResult {
            content: StageContent::Text("a,b".to_string()),
            source_reference: Some("https://example.com".to_string()),
            validity: Some(true),
            ..StageResult::default()
        };
        let (fetched, checked) = split_checked(merged);

        assert_eq!(fetched.content.as_text(), Some("a,b"));
        assert_eq!(fetched.source_reference.as_deref(), Some("https://example.com"));
        assert_eq!(fetched.validity, None);
        assert_eq!(checked.validity, Some(true));
        assert!(checked.content.is_empty());
    }

    #[test]
    fn test_table_rows_accepts_text_and_rows() {
        let rows = table_rows(StageName::ModifyTable, &StageContent::Text("a,b\n1,2\n".to_string())).unwrap();
        assert_eq!(rows.len(), 2);

        let err = table_rows(StageName::ModifyTable, &StageContent::RowIndex(3)).unwrap_err();
        assert!(err.to_string().contains("got a row index"));
    }

    #[test]
    fn test_report_lookup() {
        let report = PipelineReport {
            pipeline: "etf".to_string(),
            run_id: Uuid::nil(),
            stages: vec![StageReport {
                stage: StageName::CheckTable,
                attempts: 2,
                retry_reasons: vec!["short".to_string()],
                duration_ms: 1.0,
            }],
            total_retries: 1,
            append_point: AppendPoint::new(22),
            rows_appended: 20,
            header_written: false,
            summary: None,
            analysis_error: None,
            started_at: Utc::now(),
            duration_ms: 1.0,
        };
        assert_eq!(report.attempts(StageName::CheckTable), 2);
        assert_eq!(report.attempts(StageName::CheckDate), 0);
    }
}
