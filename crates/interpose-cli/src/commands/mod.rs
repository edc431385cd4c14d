//! CLI command implementations for the Interpose pipeline.

pub mod check;
pub mod count;
pub mod delete_batch;
pub mod expand;
pub mod explain;
pub mod paginate;

use anyhow::{Context, Result};
use interpose_core::{DbType, MetadataConfig, MetadataRegistry, PipelineConfig, StageProperties};
use interpose_rewrite::{ConnectionInfo, ExecuteResult, Executor, ResultSet};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Where the pipeline configuration comes from, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct PipelineSource {
    pub config: Option<PathBuf>,
    pub properties: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub db_type: Option<String>,
}

impl PipelineSource {
    /// Load the pipeline configuration. With no file given the pipeline is
    /// empty.
    pub fn load(&self) -> Result<PipelineConfig> {
        let mut config = match (&self.config, &self.properties) {
            (Some(path), _) => PipelineConfig::load_with_context(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let properties = StageProperties::parse(&text)
                    .with_context(|| format!("Invalid properties in {}", path.display()))?;
                PipelineConfig::from_properties(&properties)?
            }
            (None, None) => PipelineConfig::default(),
        };

        if let Some(path) = &self.metadata {
            let loaded = MetadataConfig::from_file(path)
                .with_context(|| format!("Failed to load metadata {}", path.display()))?;
            config.metadata = Some(match config.metadata.take() {
                Some(mut existing) => {
                    existing.entities.extend(loaded.entities);
                    existing
                }
                None => loaded,
            });
        }

        if let Some(db_type) = &self.db_type {
            config.db_type = Some(db_type.parse()?);
        }

        tracing::debug!(stages = config.stages.len(), db_type = ?config.db_type, "Loaded pipeline");
        Ok(config)
    }
}

/// The database type a dialect-specific command must know.
pub fn require_db_type(config: &PipelineConfig) -> Result<DbType> {
    config
        .db_type
        .context("No database type configured; pass --db-type or set db_type in the configuration")
}

/// Entity metadata from the configuration.
pub fn require_metadata(config: &PipelineConfig) -> Result<MetadataRegistry> {
    let metadata = config
        .metadata
        .as_ref()
        .context("No entity metadata; pass --metadata or set metadata_file in the configuration")?;
    Ok(MetadataRegistry::from_config(metadata)?)
}

/// SQL from the argument, or from standard input for `-`.
pub fn read_sql(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("Failed to read SQL from stdin")?;
    Ok(sql.trim().to_string())
}

/// A command-line value: JSON when it parses as JSON, else a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// One statement as it would have been sent to the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedStatement {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Executor that records statements instead of running them. Count queries
/// report a fixed total; other queries return no rows.
pub struct DryRunExecutor {
    url: String,
    total: u64,
    executed: Mutex<Vec<ExecutedStatement>>,
}

impl DryRunExecutor {
    pub fn new(url: impl Into<String>, total: u64) -> Self {
        Self {
            url: url.into(),
            total,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Executor for DryRunExecutor {
    fn connection(&self) -> ConnectionInfo {
        ConnectionInfo::new(&self.url)
    }

    fn execute(&self, sql: &str, parameters: &[Value]) -> anyhow::Result<ExecuteResult> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutedStatement {
                sql: sql.to_string(),
                parameters: parameters.to_vec(),
            });

        let head = sql.trim_start().to_ascii_uppercase();
        if head.starts_with("SELECT COUNT(*) AS TOTAL") {
            return Ok(ExecuteResult::Rows(ResultSet {
                columns: vec!["total".to_string()],
                rows: vec![vec![Value::from(self.total)]],
            }));
        }
        if head.starts_with("SELECT") || head.starts_with("WITH") {
            return Ok(ExecuteResult::Rows(ResultSet::empty()));
        }
        Ok(ExecuteResult::Affected(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("7"), json!(7));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("acme"), json!("acme"));
        assert_eq!(parse_value("\"7\""), json!("7"));
    }

    #[test]
    fn test_dry_run_executor_answers_counts() {
        let executor = DryRunExecutor::new("mysql://localhost/app", 42);
        let count = executor.query("SELECT COUNT(*) AS total FROM t", &[]).unwrap();
        assert_eq!(count.scalar_u64(), Some(42));
        assert!(executor.query("SELECT * FROM t", &[]).unwrap().is_empty());
        assert_eq!(executor.update("DELETE FROM t WHERE id = ?", &[json!(1)]).unwrap(), 0);
        assert_eq!(executor.executed().len(), 3);
        assert_eq!(executor.executed()[2].parameters, vec![json!(1)]);
    }

    #[test]
    fn test_load_properties_with_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "@tenant=tenant-line").unwrap();
        writeln!(file, "tenant:tenantValue=7").unwrap();

        let source = PipelineSource {
            properties: Some(file.path().to_path_buf()),
            db_type: Some("postgresql".to_string()),
            ..PipelineSource::default()
        };
        let config = source.load().unwrap();
        assert_eq!(config.stages.len(), 1);
        assert_eq!(config.db_type, Some(DbType::Postgresql));
    }

    #[test]
    fn test_empty_source_loads_empty_pipeline() {
        let config = PipelineSource::default().load().unwrap();
        assert!(config.stages.is_empty());
        assert!(require_db_type(&config).is_err());
        assert!(require_metadata(&config).is_err());
    }
}
