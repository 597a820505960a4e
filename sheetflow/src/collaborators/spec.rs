//! Serializable collaborator descriptions and the factory that builds them.

use super::{
    Collaborator, CsvFileAppender, CsvFileLocator, DateColumnTransform, DateFormatChecker,
    StaticCollaborator, SystemClock, TableShapeChecker, DEFAULT_DATE_FORMAT,
};
use crate::core::StageResult;
use crate::errors::ConfigError;
use crate::table::TableShape;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

fn default_timeout_secs() -> u64 {
    120
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_date_header() -> String {
    "Date".to_string()
}

/// One collaborator, as written in a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollaboratorSpec {
    /// An agent service reached over HTTP.
    Http {
        /// The URL tasks are POSTed to.
        endpoint: String,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        token_env: Option<String>,
        /// Request timeout in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// The local clock.
    SystemClock {
        /// `chrono` format of the stamp.
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// Checks the date stamp against a format.
    DateFormat {
        /// `chrono` format the stamp must parse with.
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// Checks the table shape.
    TableShape {
        /// The expected shape.
        #[serde(flatten)]
        shape: TableShape,
    },
    /// Adds the date column and renames headers.
    DateColumn {
        /// Header of the inserted column.
        #[serde(default = "default_date_header")]
        date_header: String,
        /// Header renames, old to new.
        #[serde(default)]
        renames: HashMap<String, String>,
    },
    /// Locates the next empty row of a local CSV file.
    CsvFileLocator {
        /// The file.
        path: PathBuf,
    },
    /// Appends rows to a local CSV file.
    CsvFileAppender {
        /// The file.
        path: PathBuf,
    },
    /// Always returns the same result.
    Static {
        /// The result to return.
        #[serde(default)]
        result: StageResult,
    },
}

impl CollaboratorSpec {
    /// The `type` tag of this spec.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::SystemClock { .. } => "system_clock",
            Self::DateFormat { .. } => "date_format",
            Self::TableShape { .. } => "table_shape",
            Self::DateColumn { .. } => "date_column",
            Self::CsvFileLocator { .. } => "csv_file_locator",
            Self::CsvFileAppender { .. } => "csv_file_appender",
            Self::Static { .. } => "static",
        }
    }

    /// Builds the collaborator. `role` names it in logs and errors.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Unsupported` for `http` without the `http`
    /// feature, and `ConfigError::Validation` if a token variable is unset
    /// or the HTTP client cannot be built.
    pub fn build(&self, role: &str) -> Result<Arc<dyn Collaborator>, ConfigError> {
        let collaborator: Arc<dyn Collaborator> = match self {
            Self::Http {
                endpoint,
                token_env,
                timeout_secs,
            } => build_http(role, endpoint, token_env.as_deref(), *timeout_secs)?,
            Self::SystemClock { format } => Arc::new(SystemClock::new(format.clone())),
            Self::DateFormat { format } => Arc::new(DateFormatChecker::new(format.clone())),
            Self::TableShape { shape } => Arc::new(TableShapeChecker::new(shape.clone())),
            Self::DateColumn {
                date_header,
                renames,
            } => Arc::new(DateColumnTransform::new(date_header.clone()).with_renames(renames.clone())),
            Self::CsvFileLocator { path } => Arc::new(CsvFileLocator::new(path.clone())),
            Self::CsvFileAppender { path } => Arc::new(CsvFileAppender::new(path.clone())),
            Self::Static { result } => Arc::new(StaticCollaborator::new(role, result.clone())),
        };
        tracing::debug!(role, kind = self.type_name(), "Built collaborator");
        Ok(collaborator)
    }
}

#[cfg(feature = "http")]
fn build_http(
    role: &str,
    endpoint: &str,
    token_env: Option<&str>,
    timeout_secs: u64,
) -> Result<Arc<dyn Collaborator>, ConfigError> {
    let mut collaborator =
        super::HttpCollaborator::new(role, endpoint, std::time::Duration::from_secs(timeout_secs))
            .map_err(|e| ConfigError::validation(format!("{role}: {e}")))?;
    if let Some(var) = token_env {
        let token = std::env::var(var).map_err(|_| {
            ConfigError::validation(format!("{role}: environment variable '{var}' is not set"))
        })?;
        collaborator = collaborator.with_token(token);
    }
    Ok(Arc::new(collaborator))
}

#[cfg(not(feature = "http"))]
fn build_http(
    _role: &str,
    _endpoint: &str,
    _token_env: Option<&str>,
    _timeout_secs: u64,
) -> Result<Arc<dyn Collaborator>, ConfigError> {
    Err(ConfigError::Unsupported("http".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specs() {
        let json = r#"[
            {"type": "system_clock"},
            {"type": "table_shape", "required_headers": ["Symbol"], "expected_data_rows": 20},
            {"type": "date_column", "renames": {"Chg %": "Change %"}},
            {"type": "csv_file_locator", "path": "out/sheet.csv"},
            {"type": "static", "result": {"is_valid": true}},
            {"type": "http", "endpoint": "http://localhost:8080/agent"}
        ]"#;
        let specs: Vec<CollaboratorSpec> = serde_json::from_str(json).unwrap();

        assert_eq!(
            specs[0],
            CollaboratorSpec::SystemClock {
                format: DEFAULT_DATE_FORMAT.to_string()
            }
        );
        match &specs[1] {
            CollaboratorSpec::TableShape { shape } => {
                assert_eq!(shape.required_headers, vec!["Symbol".to_string()]);
                assert_eq!(shape.expected_data_rows, Some(20));
            }
            other => panic!("unexpected spec {other:?}"),
        }
        assert_eq!(specs[4].type_name(), "static");
        match &specs[5] {
            CollaboratorSpec::Http { timeout_secs, token_env, .. } => {
                assert_eq!(*timeout_secs, 120);
                assert!(token_env.is_none());
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = serde_json::from_str::<CollaboratorSpec>(r#"{"type": "carrier_pigeon"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_build_local_specs() {
        let clock = CollaboratorSpec::SystemClock {
            format: DEFAULT_DATE_FORMAT.to_string(),
        }
        .build("fetch_date")
        .unwrap();
        assert_eq!(clock.name(), "system_clock");

        let fixed = CollaboratorSpec::Static {
            result: StageResult::valid(),
        }
        .build("check_table")
        .unwrap();
        assert_eq!(fixed.name(), "check_table");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_token_env_must_exist() {
        let spec = CollaboratorSpec::Http {
            endpoint: "http://localhost:8080/agent".to_string(),
            token_env: Some("SHEETFLOW_TEST_TOKEN_THAT_IS_NOT_SET".to_string()),
            timeout_secs: 5,
        };
        let err = spec.build("fetch_table").err().unwrap();
        assert!(err.to_string().contains("SHEETFLOW_TEST_TOKEN_THAT_IS_NOT_SET"));
    }

    #[cfg(not(feature = "http"))]
    #[test]
    fn test_http_unsupported_without_feature() {
        let spec = CollaboratorSpec::Http {
            endpoint: "http://localhost:8080/agent".to_string(),
            token_env: None,
            timeout_secs: 5,
        };
        assert!(matches!(spec.build("fetch_table"), Err(ConfigError::Unsupported(_))));
    }
}
