//! Pipeline and job configuration.
//!
//! A job file is JSON:
//!
//! ```json
//! {
//!   "jobs": [{
//!     "pipeline": { "name": "etf_daily", "source": "https://example.com/etfs" },
//!     "collaborators": {
//!       "fetch_table": { "type": "http", "endpoint": "http://localhost:8080/fetch" },
//!       "check_table": { "type": "table_shape", "expected_data_rows": 20 },
//!       "fetch_date": { "type": "system_clock" },
//!       "check_date": { "type": "date_format" },
//!       "modify_table": { "type": "date_column" },
//!       "locate": { "type": "csv_file_locator", "path": "out/etfs.csv" },
//!       "append": { "type": "csv_file_appender", "path": "out/etfs.csv" }
//!     }
//!   }]
//! }
//! ```

use crate::collaborators::CollaboratorSpec;
use crate::core::StageName;
use crate::errors::ConfigError;
use crate::pipeline::{RetryPolicy, RowGroupValidator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default rows requested per column page when scanning the sink.
pub const DEFAULT_SCAN_PAGE_SIZE: u64 = 50;

/// Default cap on column pages per locate attempt.
pub const DEFAULT_MAX_SCAN_PAGES: u64 = 200;

fn default_name() -> String {
    "table_pipeline".to_string()
}

fn default_scan_page_size() -> u64 {
    DEFAULT_SCAN_PAGE_SIZE
}

fn default_max_scan_pages() -> u64 {
    DEFAULT_MAX_SCAN_PAGES
}

fn default_checker_policy() -> RetryPolicy {
    RetryPolicy::new(3)
}

fn default_paced_policy() -> RetryPolicy {
    RetryPolicy::new(3).with_delay_ms(1000)
}

fn default_analysis_policy() -> RetryPolicy {
    RetryPolicy::new(3).with_delay_ms(2000)
}

/// Retry policies of the gated stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicies {
    /// Fetch-then-check of the table.
    #[serde(default = "default_checker_policy")]
    pub check_table: RetryPolicy,
    /// Fetch-then-check of the date stamp.
    #[serde(default = "default_paced_policy")]
    pub check_date: RetryPolicy,
    /// Reading the append point.
    #[serde(default = "default_paced_policy")]
    pub locate: RetryPolicy,
    /// Trend analysis.
    #[serde(default = "default_analysis_policy")]
    pub analysis: RetryPolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            check_table: default_checker_policy(),
            check_date: default_paced_policy(),
            locate: default_paced_policy(),
            analysis: default_analysis_policy(),
        }
    }
}

impl StagePolicies {
    /// The policy a stage runs under. Stages without a gate get one attempt.
    #[must_use]
    pub fn for_stage(&self, stage: StageName) -> RetryPolicy {
        match stage {
            StageName::FetchTable | StageName::CheckTable => self.check_table,
            StageName::FetchDate | StageName::CheckDate => self.check_date,
            StageName::LocateAppendPoint => self.locate,
            StageName::AnalyzeTrends => self.analysis,
            StageName::ModifyTable | StageName::NormalizeAndAppend => RetryPolicy::once(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in [
            ("check_table", &self.check_table),
            ("check_date", &self.check_date),
            ("locate", &self.locate),
            ("analysis", &self.analysis),
        ] {
            policy
                .validate()
                .map_err(|e| ConfigError::validation(format!("policies.{name}: {e}")))?;
        }
        Ok(())
    }
}

/// Local files written during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPaths {
    /// The raw fetched table, overwritten on every fetch attempt.
    pub raw: Option<PathBuf>,
    /// The modified table, overwritten once per run.
    pub modified: Option<PathBuf>,
    /// A running CSV of everything appended, header written once.
    pub history: Option<PathBuf>,
}

/// Placeholders every template may use.
const COMMON_PLACEHOLDERS: &[&str] = &["name", "source", "attempt"];

/// Natural-language task descriptions, one per stage.
///
/// Templates use `{placeholder}` syntax. Each stage accepts the common
/// placeholders (`name`, `source`, `attempt`) plus its own:
///
/// | stage | extra placeholders |
/// |---|---|
/// | `check_date`, `modify_table` | `date` |
/// | `locate_append_point` | `start_row`, `end_row` |
/// | `normalize_and_append` | `row`, `rows` |
/// | `analyze_trends` | `date`, `row`, `rows` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTemplates {
    /// Fetch the table.
    pub fetch_table: String,
    /// Check the fetched table.
    pub check_table: String,
    /// Fetch the date stamp.
    pub fetch_date: String,
    /// Check the date stamp.
    pub check_date: String,
    /// Reshape the table.
    pub modify_table: String,
    /// Locate the append point.
    pub locate_append_point: String,
    /// Append the rows.
    pub normalize_and_append: String,
    /// Analyze trends.
    pub analyze_trends: String,
}

impl Default for TaskTemplates {
    fn default() -> Self {
        Self {
            fetch_table: "Fetch the table at {source} and return it as CSV with its header row.".to_string(),
            check_table: "Check that the attached table has the expected headers, the expected number \
                          of data rows, and that its second row has as many cells as the header row."
                .to_string(),
            fetch_date: "Return the current date and time formatted as YYYY-MM-DD HH:MM:SS.".to_string(),
            check_date: "Check that '{date}' is a date and time formatted as YYYY-MM-DD HH:MM:SS.".to_string(),
            modify_table: "Add a column named Date as the first column of the attached table and fill \
                           every data row with '{date}'. Return the table as CSV."
                .to_string(),
            locate_append_point: "Return the values of the first column from row {start_row} to row \
                                  {end_row}, without skipping any row."
                .to_string(),
            normalize_and_append: "Append the attached {rows} rows starting at row {row}.".to_string(),
            analyze_trends: "Compare the {rows} rows appended at row {row} on {date} with the attached \
                             earlier rows and summarize the trends."
                .to_string(),
        }
    }
}

#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder regex"))
}

impl TaskTemplates {
    /// The template of a stage.
    #[must_use]
    pub fn template(&self, stage: StageName) -> &str {
        match stage {
            StageName::FetchTable => &self.fetch_table,
            StageName::CheckTable => &self.check_table,
            StageName::FetchDate => &self.fetch_date,
            StageName::CheckDate => &self.check_date,
            StageName::ModifyTable => &self.modify_table,
            StageName::LocateAppendPoint => &self.locate_append_point,
            StageName::NormalizeAndAppend => &self.normalize_and_append,
            StageName::AnalyzeTrends => &self.analyze_trends,
        }
    }

    /// Placeholders a stage's template may use besides the common ones.
    #[must_use]
    pub fn stage_placeholders(stage: StageName) -> &'static [&'static str] {
        match stage {
            StageName::FetchTable | StageName::CheckTable | StageName::FetchDate => &[],
            StageName::CheckDate | StageName::ModifyTable => &["date"],
            StageName::LocateAppendPoint => &["start_row", "end_row"],
            StageName::NormalizeAndAppend => &["row", "rows"],
            StageName::AnalyzeTrends => &["date", "row", "rows"],
        }
    }

    fn allows(stage: StageName, placeholder: &str) -> bool {
        COMMON_PLACEHOLDERS.contains(&placeholder) || Self::stage_placeholders(stage).contains(&placeholder)
    }

    /// Renders a stage's template. Allowed placeholders without a value are
    /// left as written.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownPlaceholder` for a placeholder the stage
    /// does not accept.
    pub fn render(&self, stage: StageName, vars: &BTreeMap<&str, String>) -> Result<String, ConfigError> {
        self.check_stage(stage)?;
        Ok(self.fill(stage, vars))
    }

    /// Substitutes `vars` into a stage's template without checking
    /// placeholders. Used once the templates have been validated.
    #[must_use]
    pub fn fill(&self, stage: StageName, vars: &BTreeMap<&str, String>) -> String {
        placeholder_regex()
            .replace_all(self.template(stage), |caps: &regex::Captures<'_>| {
                vars.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn check_stage(&self, stage: StageName) -> Result<(), ConfigError> {
        for caps in placeholder_regex().captures_iter(self.template(stage)) {
            let name = &caps[1];
            if !Self::allows(stage, name) {
                return Err(ConfigError::UnknownPlaceholder {
                    stage,
                    placeholder: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks every template for unknown placeholders.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError::UnknownPlaceholder` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        StageName::ALL.iter().try_for_each(|stage| self.check_stage(*stage))
    }
}

/// Configuration of one table pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The pipeline name, used in logs, events and task text.
    #[serde(default = "default_name")]
    pub name: String,
    /// Where the table comes from (a URL for fetch agents).
    #[serde(default)]
    pub source: String,
    /// Per-stage retry policies.
    #[serde(default)]
    pub policies: StagePolicies,
    /// Expected row batches in the sink.
    #[serde(default)]
    pub row_groups: RowGroupValidator,
    /// Rows per column page when the locator answers with pages.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: u64,
    /// Maximum column pages read per locate attempt.
    #[serde(default = "default_max_scan_pages")]
    pub max_scan_pages: u64,
    /// Local snapshot files.
    #[serde(default)]
    pub snapshots: SnapshotPaths,
    /// Task descriptions.
    #[serde(default)]
    pub tasks: TaskTemplates,
    /// Whether to run the trend analysis stage.
    #[serde(default)]
    pub analyze: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            source: String::new(),
            policies: StagePolicies::default(),
            row_groups: RowGroupValidator::default(),
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            max_scan_pages: DEFAULT_MAX_SCAN_PAGES,
            snapshots: SnapshotPaths::default(),
            tasks: TaskTemplates::default(),
            analyze: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the table source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the retry policies.
    #[must_use]
    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the row-group validator.
    #[must_use]
    pub fn with_row_groups(mut self, row_groups: RowGroupValidator) -> Self {
        self.row_groups = row_groups;
        self
    }

    /// Sets the column page size used when scanning the sink.
    #[must_use]
    pub fn with_scan_page_size(mut self, size: u64) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Sets the snapshot paths.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: SnapshotPaths) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Sets the task templates.
    #[must_use]
    pub fn with_tasks(mut self, tasks: TaskTemplates) -> Self {
        self.tasks = tasks;
        self
    }

    /// Enables or disables trend analysis.
    #[must_use]
    pub fn with_analysis(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("name must not be empty"));
        }
        self.policies.validate()?;
        if self.row_groups.batch_size == 0 {
            return Err(ConfigError::validation("row_groups.batch_size must be >= 1"));
        }
        if self.row_groups.header_rows > 1 {
            return Err(ConfigError::validation("row_groups.header_rows must be 0 or 1"));
        }
        if self.scan_page_size == 0 {
            return Err(ConfigError::validation("scan_page_size must be >= 1"));
        }
        if self.max_scan_pages == 0 {
            return Err(ConfigError::validation("max_scan_pages must be >= 1"));
        }
        self.tasks.validate()
    }
}

/// The collaborator behind each pipeline role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorSet {
    /// Fetches the table.
    pub fetch_table: CollaboratorSpec,
    /// Checks the table.
    pub check_table: CollaboratorSpec,
    /// Fetches the date stamp.
    pub fetch_date: CollaboratorSpec,
    /// Checks the date stamp.
    pub check_date: CollaboratorSpec,
    /// Reshapes the table.
    pub modify_table: CollaboratorSpec,
    /// Reads the sink.
    pub locate: CollaboratorSpec,
    /// Writes the sink.
    pub append: CollaboratorSpec,
    /// Analyzes trends, when enabled.
    #[serde(default)]
    pub analyze: Option<CollaboratorSpec>,
}

/// One configured pipeline with its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// The pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// The collaborators.
    pub collaborators: CollaboratorSet,
}

impl JobConfig {
    /// Validates the job.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the pipeline is invalid or analysis is
    /// enabled without an analysis collaborator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        if self.pipeline.analyze && self.collaborators.analyze.is_none() {
            return Err(ConfigError::validation(format!(
                "job '{}' enables analysis but has no analyze collaborator",
                self.pipeline.name
            )));
        }
        Ok(())
    }
}

/// A file of jobs run one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsFile {
    /// The jobs, in run order.
    pub jobs: Vec<JobConfig>,
}

impl JobsFile {
    /// Parses and validates a jobs file from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseJson` or the first validation error.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: Self = serde_json::from_str(text)?;
        if file.jobs.is_empty() {
            return Err(ConfigError::validation("no jobs configured"));
        }
        for job in &file.jobs {
            job.validate()?;
        }
        Ok(file)
    }

    /// Reads a jobs file from disk.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile` if the file cannot be read, otherwise
    /// as [`JobsFile::from_json`].
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Finds a job by pipeline name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.pipeline.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const JOBS: &str = r#"{
        "jobs": [{
            "pipeline": {"name": "etf_daily", "source": "https://example.com/etfs"},
            "collaborators": {
                "fetch_table": {"type": "static", "result": {"content": "Symbol\nSPY"}},
                "check_table": {"type": "table_shape", "expected_data_rows": 1},
                "fetch_date": {"type": "system_clock"},
                "check_date": {"type": "date_format"},
                "modify_table": {"type": "date_column"},
                "locate": {"type": "csv_file_locator", "path": "out.csv"},
                "append": {"type": "csv_file_appender", "path": "out.csv"}
            }
        }]
    }"#;

    #[test]
    fn test_default_policies() {
        let policies = StagePolicies::default();
        assert_eq!(policies.check_table.max_attempts, 3);
        assert_eq!(policies.check_table.delay(), Duration::ZERO);
        assert_eq!(policies.check_date.delay(), Duration::from_secs(1));
        assert_eq!(policies.locate.delay(), Duration::from_secs(1));
        assert_eq!(policies.analysis.delay(), Duration::from_secs(2));
        assert_eq!(policies.for_stage(StageName::ModifyTable), RetryPolicy::once());
    }

    #[test]
    fn test_parse_jobs_file() {
        let file = JobsFile::from_json(JOBS).unwrap();
        let job = file.job("etf_daily").unwrap();

        assert_eq!(job.pipeline.source, "https://example.com/etfs");
        assert_eq!(job.pipeline.row_groups, RowGroupValidator::default());
        assert_eq!(job.pipeline.scan_page_size, DEFAULT_SCAN_PAGE_SIZE);
        assert!(!job.pipeline.analyze);
        assert!(job.collaborators.analyze.is_none());
        assert!(file.job("missing").is_none());
    }

    #[test]
    fn test_partial_policy_override() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"policies": {"check_table": {"max_attempts": 5}}}"#).unwrap();
        assert_eq!(config.policies.check_table, RetryPolicy::new(5));
        assert_eq!(config.policies.check_date, RetryPolicy::new(3).with_delay_ms(1000));
        assert_eq!(config.name, "table_pipeline");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = PipelineConfig::new("etf");
        config.policies.locate = RetryPolicy::new(0);
        assert!(config.validate().unwrap_err().to_string().contains("policies.locate"));

        let config = PipelineConfig::new("etf").with_row_groups(RowGroupValidator::new(0));
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("etf").with_scan_page_size(0);
        assert!(config.validate().is_err());

        let config =
            PipelineConfig::new("etf").with_row_groups(RowGroupValidator::new(20).with_header_rows(2));
        assert!(config.validate().unwrap_err().to_string().contains("header_rows"));
        let config =
            PipelineConfig::new("etf").with_row_groups(RowGroupValidator::new(20).with_header_rows(0));
        assert!(config.validate().is_ok());

        assert!(PipelineConfig::new(" ").validate().is_err());
        assert!(PipelineConfig::new("etf").validate().is_ok());
    }

    #[test]
    fn test_analysis_needs_collaborator() {
        let mut file: JobsFile = serde_json::from_str(JOBS).unwrap();
        file.jobs[0].pipeline.analyze = true;
        let err = file.jobs[0].validate().unwrap_err();
        assert!(err.to_string().contains("no analyze collaborator"));
    }

    #[test]
    fn test_render_templates() {
        let tasks = TaskTemplates::default();
        let mut vars = BTreeMap::new();
        vars.insert("date", "2025-06-20 10:00:00".to_string());

        let text = tasks.render(StageName::CheckDate, &vars).unwrap();
        assert_eq!(
            text,
            "Check that '2025-06-20 10:00:00' is a date and time formatted as YYYY-MM-DD HH:MM:SS."
        );

        let text = tasks.render(StageName::FetchTable, &BTreeMap::new()).unwrap();
        assert!(text.contains("{source}"));
    }

    #[test]
    fn test_unknown_placeholder() {
        let tasks = TaskTemplates {
            fetch_date: "What time is it in {city}?".to_string(),
            ..TaskTemplates::default()
        };
        let err = tasks.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownPlaceholder { stage: StageName::FetchDate, ref placeholder } if placeholder == "city"
        ));

        let tasks = TaskTemplates {
            locate_append_point: "Rows {start_row}-{end_row} of {date}".to_string(),
            ..TaskTemplates::default()
        };
        assert!(tasks.render(StageName::LocateAppendPoint, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_default_templates_are_valid() {
        assert!(TaskTemplates::default().validate().is_ok());
    }
}
