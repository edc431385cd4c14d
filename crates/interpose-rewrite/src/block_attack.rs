//! Full-table UPDATE/DELETE guard.

use interpose_core::DbType;
use sqlparser::ast::{BinaryOperator, Expr, Statement};
use std::time::Duration;

use crate::chain::InnerInterceptor;
use crate::context::{BoundSql, MappedStatement, RequestContext};
use crate::error::RewriteError;
use crate::executor::ConnectionInfo;
use crate::parser::{target_table_name, StatementClassifier, StatementKind};

/// Rejects UPDATE and DELETE statements that would touch every row.
pub struct BlockAttackInterceptor {
    name: String,
    db_type: Option<DbType>,
}

impl BlockAttackInterceptor {
    pub fn new(name: impl Into<String>, db_type: Option<DbType>) -> Self {
        Self {
            name: name.into(),
            db_type,
        }
    }

    /// Check every statement of `sql`.
    pub fn check(&self, classifier: &StatementClassifier, sql: &str) -> Result<(), RewriteError> {
        let batch = classifier.parse_batch(sql)?;
        for parsed in batch.statements() {
            let stmt = parsed.statement();
            let selection = match stmt {
                Statement::Update(update) => update.selection.as_ref(),
                Statement::Delete(delete) => delete.selection.as_ref(),
                _ => continue,
            };
            if selection.is_none_or(is_tautology) {
                return Err(RewriteError::BlockedStatement {
                    operation: parsed.kind().to_string(),
                    table: target_table_name(stmt).unwrap_or_else(|| "<unknown>".to_string()),
                });
            }
        }
        Ok(())
    }
}

/// Conditions that hold for every row: `TRUE`, `1`, `x = x`, or an OR with
/// such a branch.
fn is_tautology(expr: &Expr) -> bool {
    match expr {
        Expr::Nested(inner) => is_tautology(inner),
        Expr::Value(value) => {
            let text = value.to_string();
            text.eq_ignore_ascii_case("true") || text == "1"
        }
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::Eq => {
                let left = left.to_string();
                !left.contains('?') && left == right.to_string()
            }
            BinaryOperator::Or => is_tautology(left) || is_tautology(right),
            BinaryOperator::And => is_tautology(left) && is_tautology(right),
            _ => false,
        },
        _ => false,
    }
}

impl InnerInterceptor for BlockAttackInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_prepare(
        &self,
        connection: &ConnectionInfo,
        _timeout: Option<Duration>,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        _ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        if !matches!(ms.kind, StatementKind::Update | StatementKind::Delete) {
            return Ok(());
        }
        let db_type = self
            .db_type
            .unwrap_or_else(|| DbType::from_url(&connection.url));
        let result = self.check(&StatementClassifier::new(db_type), &bound.sql);
        if let Err(err) = &result {
            tracing::warn!(statement = %ms.id, sql = %bound.sql, error = %err, "Blocked full-table statement");
        }
        result
    }
}
