//! `interpose check` command implementation.
//!
//! Validates a pipeline configuration before it is deployed:
//! - every stage can be built from its properties
//! - pagination has a dialect for the configured database
//! - tenant values parse as SQL and ignored tables exist in the metadata
//! - stage names are unique and stages are ordered sensibly
//! - entity metadata is complete enough for the stages that use it

use anyhow::Result;
use interpose_core::{
    DbType, DynamicTableNameConfig, MetadataLookup, MetadataRegistry, PaginationConfig,
    PipelineConfig, StageKind, TenancyConfig, TenantValueSource,
};
use interpose_rewrite::{dialect_for, InterceptorChain, StatementClassifier};
use std::collections::{BTreeMap, HashSet};

use super::PipelineSource;

// ============================================================================
// Check Result Types
// ============================================================================

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    pub message: String,
    /// Stage alias or entity the finding is about.
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn add(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Print human-readable summary, most severe first.
    pub fn print_summary(&self) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(&b.category)));

        for finding in &findings {
            print_finding(finding);
        }

        println!();
        println!("{}", "═".repeat(60));
        let errors = self.count(Severity::Error);
        let warnings = self.count(Severity::Warning);
        if errors == 0 && warnings == 0 {
            println!("✅ All checks passed!");
        } else {
            println!("Summary: {errors} error(s), {warnings} warning(s)");
            if errors > 0 {
                println!("\n❌ Configuration has errors that must be fixed.");
            }
        }
    }
}

fn print_finding(finding: &CheckFinding) {
    let icon = match finding.severity {
        Severity::Error => "✗",
        Severity::Warning => "⚠",
        Severity::Info => "ℹ",
    };
    let location = finding
        .location
        .as_ref()
        .map(|l| format!(" [{l}]"))
        .unwrap_or_default();

    println!(
        "  {icon} {} [{}]{location}: {}",
        finding.severity, finding.category, finding.message
    );
}

// ============================================================================
// Main Check Runner
// ============================================================================

pub fn run(source: &PipelineSource) -> Result<CheckResults> {
    println!("🔍 Checking Interpose pipeline...");

    let results = match source.load() {
        Ok(config) => check_config(&config),
        Err(err) => {
            let mut results = CheckResults::default();
            results.add(CheckFinding::error("config", format!("{err:#}")));
            results
        }
    };

    results.print_summary();
    Ok(results)
}

/// Run every check against a loaded configuration.
pub fn check_config(config: &PipelineConfig) -> CheckResults {
    let mut results = CheckResults::default();

    let registry = match &config.metadata {
        Some(metadata) => match MetadataRegistry::from_config(metadata) {
            Ok(registry) => Some(registry),
            Err(err) => {
                results.add(CheckFinding::error("metadata", err.to_string()));
                None
            }
        },
        None => None,
    };

    if config.db_type.is_none() {
        results.add(CheckFinding::warning(
            "database",
            "db_type is not set; statements are parsed with the generic grammar",
        ));
    }

    if let Err(err) = InterceptorChain::from_config(config) {
        results.add(CheckFinding::error("chain", err.to_string()));
    }

    check_stage_names(config, &mut results);
    check_stage_order(config, &mut results);
    for stage in &config.stages {
        let findings = match stage.kind {
            StageKind::Pagination => check_pagination(config, &stage.properties),
            StageKind::TenantLine => check_tenancy(config, &stage.properties, registry.as_ref()),
            StageKind::DynamicTableName => check_dynamic_tables(&stage.properties),
            StageKind::ColumnTemplate | StageKind::BlockAttack => Vec::new(),
        };
        for finding in findings {
            results.add(finding.at(stage.name()));
        }
    }
    if let Some(registry) = &registry {
        check_metadata(registry, &mut results);
    }

    results
}

fn check_stage_names(config: &PipelineConfig, results: &mut CheckResults) {
    let mut seen = HashSet::new();
    for stage in &config.stages {
        if !seen.insert(stage.name()) {
            results.add(
                CheckFinding::error("stages", "stage name is used more than once")
                    .at(stage.name()),
            );
        }
    }
}

/// A block-attack stage behind tenant-line never sees a bare DELETE: the
/// tenant predicate has already become its WHERE clause.
fn check_stage_order(config: &PipelineConfig, results: &mut CheckResults) {
    let position = |kind: StageKind| config.stages.iter().position(|s| s.kind == kind);
    if let (Some(tenant), Some(guard)) = (
        position(StageKind::TenantLine),
        position(StageKind::BlockAttack),
    ) {
        if guard > tenant {
            results.add(
                CheckFinding::warning(
                    "stages",
                    "block-attack runs after tenant-line and will accept tenant-wide UPDATE/DELETE",
                )
                .at(config.stages[guard].name()),
            );
        }
    }
}

fn check_pagination(
    config: &PipelineConfig,
    properties: &BTreeMap<String, String>,
) -> Vec<CheckFinding> {
    let pagination = match PaginationConfig::from_properties(properties) {
        Ok(pagination) => pagination,
        Err(err) => return vec![CheckFinding::error("pagination", err.to_string())],
    };
    match pagination.db_type.or(config.db_type) {
        Some(db_type) => match dialect_for(db_type) {
            Ok(_) => Vec::new(),
            Err(err) => vec![CheckFinding::error("pagination", err.to_string())],
        },
        None => vec![CheckFinding::info(
            "pagination",
            "dialect will be detected from the connection URL",
        )],
    }
}

fn check_tenancy(
    config: &PipelineConfig,
    properties: &BTreeMap<String, String>,
    registry: Option<&MetadataRegistry>,
) -> Vec<CheckFinding> {
    let tenancy = match TenancyConfig::from_properties(properties) {
        Ok(tenancy) => tenancy,
        Err(err) => return vec![CheckFinding::error("tenancy", err.to_string())],
    };
    let mut findings = Vec::new();

    if let TenantValueSource::Literal(literal) = &tenancy.value {
        let classifier = StatementClassifier::new(config.db_type.unwrap_or(DbType::Other));
        if let Err(err) = classifier.parse_expr(literal) {
            findings.push(CheckFinding::error(
                "tenancy",
                format!("tenantValue is not a SQL expression: {err}"),
            ));
        }
    }

    if let Some(registry) = registry {
        for table in &tenancy.ignore_tables {
            if registry.resolve(table).is_none() {
                findings.push(CheckFinding::warning(
                    "tenancy",
                    format!("ignored table {table} is not in the entity metadata"),
                ));
            }
        }
    }

    findings
}

fn check_dynamic_tables(
    properties: &BTreeMap<String, String>,
) -> Vec<CheckFinding> {
    match DynamicTableNameConfig::from_properties(properties) {
        Ok(tables) if tables.tables.is_empty() => vec![CheckFinding::warning(
            "dynamic-table-name",
            "no tables configured; the stage renames nothing",
        )],
        Ok(_) => Vec::new(),
        Err(err) => vec![CheckFinding::error("dynamic-table-name", err.to_string())],
    }
}

fn check_metadata(registry: &MetadataRegistry, results: &mut CheckResults) {
    for info in registry.entities() {
        if info.logic_delete_field().is_some() && info.key.is_none() {
            results.add(
                CheckFinding::warning(
                    "metadata",
                    "entity has a logic delete field but no key; delete-by-ids will fail",
                )
                .at(&info.entity),
            );
        }
        if info.select_fields().next().is_none() {
            results.add(
                CheckFinding::warning("metadata", "entity has no selectable columns")
                    .at(&info.entity),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(yaml: &str) -> CheckResults {
        check_config(&PipelineConfig::from_yaml(yaml).unwrap())
    }

    fn categories(results: &CheckResults, severity: Severity) -> Vec<String> {
        results
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.category.clone())
            .collect()
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let results = check(
            r#"
db_type: mysql
stages:
  - type: block-attack
  - alias: tenant
    type: tenant-line
    properties:
      tenantValue: "7"
  - type: pagination
"#,
        );
        assert!(!results.has_errors());
        assert_eq!(results.count(Severity::Warning), 0);
    }

    #[test]
    fn test_unsupported_dialect() {
        let results = check(
            r#"
db_type: other
stages:
  - type: pagination
"#,
        );
        assert!(results.has_errors());
        assert_eq!(categories(&results, Severity::Error), vec!["pagination"]);
    }

    #[test]
    fn test_duplicate_names_and_order() {
        let results = check(
            r#"
db_type: mysql
stages:
  - alias: t
    type: tenant-line
  - alias: t
    type: block-attack
"#,
        );
        assert_eq!(categories(&results, Severity::Error), vec!["stages"]);
        assert_eq!(categories(&results, Severity::Warning), vec!["stages"]);
    }

    #[test]
    fn test_bad_tenant_value_and_missing_metadata() {
        let results = check(
            r#"
db_type: mysql
stages:
  - type: tenant-line
    properties:
      tenantValue: "7 +"
  - type: column-template
"#,
        );
        let errors = categories(&results, Severity::Error);
        assert!(errors.contains(&"tenancy".to_string()));
        assert!(errors.contains(&"chain".to_string()));
    }

    #[test]
    fn test_metadata_without_key() {
        let results = check(
            r#"
db_type: mysql
metadata:
  entities:
    - name: Task
      fields:
        - property: title
        - property: deleted
          logic_delete: {}
"#,
        );
        assert!(!results.has_errors());
        assert_eq!(categories(&results, Severity::Warning), vec!["metadata"]);
    }
}
