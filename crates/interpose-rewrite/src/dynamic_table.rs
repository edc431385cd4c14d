//! Per-request table names.

use interpose_core::{DbType, DynamicTableNameConfig};
use serde_json::Value;
use sqlparser::ast::{visit_relations_mut, ObjectNamePart};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::InnerInterceptor;
use crate::context::{BoundSql, MappedStatement, RequestContext};
use crate::error::RewriteError;
use crate::executor::ConnectionInfo;
use crate::parser::{StatementClassifier, StatementKind};

/// Maps a logical table name to its physical name for the current request.
pub trait TableNameHandler: Send + Sync {
    /// `None` keeps the logical name.
    fn dynamic_table_name(&self, table: &str, ctx: &RequestContext) -> Option<String>;
}

/// Appends a request attribute as a suffix to configured tables.
#[derive(Debug, Clone)]
pub struct SuffixTableNameHandler {
    config: DynamicTableNameConfig,
}

impl SuffixTableNameHandler {
    pub fn new(config: DynamicTableNameConfig) -> Self {
        Self { config }
    }
}

impl TableNameHandler for SuffixTableNameHandler {
    fn dynamic_table_name(&self, table: &str, ctx: &RequestContext) -> Option<String> {
        if !self.config.is_dynamic(table) {
            return None;
        }
        let suffix = match ctx.attribute(&self.config.suffix_attribute)? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(format!("{table}{}{suffix}", self.config.separator))
    }
}

/// Pipeline stage renaming tables before preparation.
pub struct DynamicTableNameInterceptor {
    name: String,
    db_type: Option<DbType>,
    handler: Arc<dyn TableNameHandler>,
}

impl DynamicTableNameInterceptor {
    pub fn new(
        name: impl Into<String>,
        db_type: Option<DbType>,
        handler: Arc<dyn TableNameHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            db_type,
            handler,
        }
    }

    /// Rename tables in `sql`. Returns `None` when nothing changed.
    ///
    /// Physical names are spliced in unquoted, so anything other than a
    /// plain identifier is rejected.
    pub fn rename_tables(
        &self,
        classifier: &StatementClassifier,
        sql: &str,
        ctx: &RequestContext,
    ) -> Result<Option<String>, RewriteError> {
        let mut batch = classifier.parse_batch(sql)?;
        let mut renamed = 0usize;
        for stmt in batch.statements_mut() {
            let flow = visit_relations_mut(stmt.statement_mut(), |name| {
                if let Some(ObjectNamePart::Identifier(ident)) = name.0.last_mut() {
                    if let Some(physical) = self.handler.dynamic_table_name(&ident.value, ctx) {
                        if !is_plain_identifier(&physical) {
                            return ControlFlow::Break(RewriteError::unsupported(format!(
                                "dynamic name {physical:?} for table {} is not a plain identifier",
                                ident.value
                            )));
                        }
                        ident.value = physical;
                        renamed += 1;
                    }
                }
                ControlFlow::Continue(())
            });
            if let ControlFlow::Break(err) = flow {
                return Err(err);
            }
        }
        Ok((renamed > 0).then(|| batch.to_sql()))
    }
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl InnerInterceptor for DynamicTableNameInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_prepare(
        &self,
        connection: &ConnectionInfo,
        _timeout: Option<Duration>,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        if ms.kind == StatementKind::Other {
            return Ok(());
        }
        let db_type = self
            .db_type
            .unwrap_or_else(|| DbType::from_url(&connection.url));
        let classifier = StatementClassifier::new(db_type);
        if let Some(sql) = self.rename_tables(&classifier, &bound.sql, ctx)? {
            tracing::debug!(statement = %ms.id, rewritten = %sql, "Renamed dynamic tables");
            bound.sql = sql;
        }
        Ok(())
    }
}
