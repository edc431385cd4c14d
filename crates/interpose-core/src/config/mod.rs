//! Configuration types for the Interpose rewriting pipeline.
//!
//! A pipeline is an ordered list of stages. Each stage is declared by a type
//! identifier plus a flat key-value property bag, either in YAML:
//!
//! ```yaml
//! db_type: mysql
//! metadata_file: entities.yaml
//! stages:
//!   - alias: tenant
//!     type: tenant-line
//!     properties:
//!       column: tenant_id
//!       ignoreTables: dict,region
//!   - type: pagination
//!     properties:
//!       maxLimit: "500"
//! ```
//!
//! or as flat properties (see [`StageProperties`]):
//!
//! ```text
//! @tenant=tenant-line
//! tenant:column=tenant_id
//! @page=pagination
//! page:maxLimit=500
//! ```

pub mod dynamic_table;
pub mod pagination;
pub mod properties;
pub mod tenancy;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::db_type::DbType;
use crate::metadata::MetadataConfig;

pub use dynamic_table::DynamicTableNameConfig;
pub use pagination::PaginationConfig;
pub use properties::{StageDeclaration, StageProperties};
pub use tenancy::{TenancyConfig, TenantValueSource};

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Database product; selects the parse grammar and the default
    /// pagination dialect.
    #[serde(default)]
    pub db_type: Option<DbType>,

    /// Stages in execution order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Path to an entity metadata file (relative to the config file).
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,

    /// Inline entity metadata.
    #[serde(default)]
    pub metadata: Option<MetadataConfig>,
}

/// One stage declaration: a type plus its property bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Optional alias; defaults to the type identifier.
    #[serde(default)]
    pub alias: Option<String>,

    /// Stage type.
    #[serde(rename = "type")]
    pub kind: StageKind,

    /// Stage-specific properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl StageConfig {
    /// Create a stage declaration with no properties.
    pub fn new(kind: StageKind) -> Self {
        Self {
            alias: None,
            kind,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The alias, or the type identifier when none was given.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.kind.as_str())
    }
}

/// Known stage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Pagination,
    TenantLine,
    DynamicTableName,
    BlockAttack,
    ColumnTemplate,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Pagination => "pagination",
            StageKind::TenantLine => "tenant-line",
            StageKind::DynamicTableName => "dynamic-table-name",
            StageKind::BlockAttack => "block-attack",
            StageKind::ColumnTemplate => "column-template",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pagination" => Ok(StageKind::Pagination),
            "tenant-line" => Ok(StageKind::TenantLine),
            "dynamic-table-name" => Ok(StageKind::DynamicTableName),
            "block-attack" => Ok(StageKind::BlockAttack),
            "column-template" => Ok(StageKind::ColumnTemplate),
            other => Err(ConfigError::Config(format!("unknown stage type: {other}"))),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Build a pipeline configuration from flat stage properties.
    ///
    /// Stages keep the order in which their `@alias=type` keys were declared.
    pub fn from_properties(properties: &StageProperties) -> Result<Self, ConfigError> {
        let stages = properties
            .group()
            .into_iter()
            .map(|declaration| {
                Ok(StageConfig {
                    kind: declaration.type_id.parse()?,
                    alias: Some(declaration.alias),
                    properties: declaration.properties,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            stages,
            ..Self::default()
        })
    }

    /// Load configuration and resolve the metadata file reference.
    ///
    /// A `metadata_file` that does not exist is an error, since stages that
    /// need metadata would otherwise fail on every statement.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(metadata_file) = &config.metadata_file {
            let metadata_path = if metadata_file.is_absolute() {
                metadata_file.clone()
            } else {
                base_dir.join(metadata_file)
            };

            if !metadata_path.exists() {
                return Err(ConfigError::Config(format!(
                    "Metadata file not found: {}",
                    metadata_path.display()
                )));
            }

            let loaded = MetadataConfig::from_file(&metadata_path)?;
            config.metadata = Some(match config.metadata.take() {
                Some(mut inline) => {
                    inline.entities.extend(loaded.entities);
                    inline
                }
                None => loaded,
            });
        }

        Ok(config)
    }

    /// Find the first stage of the given kind.
    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.kind == kind)
    }
}

/// Parse a boolean property value (`true`/`false`, case-insensitive).
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::Config(format!(
            "property {key} expects true or false, got {value}"
        ))),
    }
}

/// Split a comma-separated property value, dropping empty items.
pub(crate) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_pipeline_yaml() {
        let yaml = r#"
db_type: postgresql
stages:
  - alias: tenant
    type: tenant-line
    properties:
      column: org_id
  - type: pagination
  - type: block-attack
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.db_type, Some(DbType::Postgresql));
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[0].name(), "tenant");
        assert_eq!(config.stages[1].name(), "pagination");
        assert_eq!(config.stages[2].kind, StageKind::BlockAttack);
        assert_eq!(
            config.stages[0].properties.get("column").map(String::as_str),
            Some("org_id")
        );
    }

    #[test]
    fn test_from_properties_keeps_declaration_order() {
        let props = StageProperties::parse(
            "@page=pagination\npage:dbType=h2\n@tenant=tenant-line\ntenant:column=org_id\n",
        )
        .unwrap();
        let config = PipelineConfig::from_properties(&props).unwrap();

        let kinds: Vec<_> = config.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StageKind::Pagination, StageKind::TenantLine]);
        assert_eq!(
            config.stages[0].properties.get("dbType").map(String::as_str),
            Some("h2")
        );
    }

    #[test]
    fn test_unknown_stage_type_rejected() {
        let props = StageProperties::parse("@x=optimistic-locker").unwrap();
        assert!(matches!(
            PipelineConfig::from_properties(&props),
            Err(ConfigError::Config(_))
        ));
    }

    #[test]
    fn test_missing_metadata_file_is_error() {
        let dir = std::env::temp_dir().join("interpose-core-missing-metadata");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline.yaml");
        fs::write(&path, "metadata_file: nope.yaml\n").unwrap();

        let err = PipelineConfig::load_with_context(&path).unwrap_err();
        assert!(err.to_string().contains("Metadata file not found"));
    }
}
