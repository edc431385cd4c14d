//! Tenant predicate injection.
//!
//! Every plain table reference in a SELECT, UPDATE or DELETE gets a
//! `qualifier.tenant_column = <value>` predicate ANDed into the WHERE clause
//! of the SELECT that owns it. The right-hand table of a LEFT JOIN is scoped
//! in the join's ON clause instead, so unmatched outer rows survive. Nested
//! queries (derived tables, CTE bodies, subqueries in WHERE or in the
//! projection, set operation branches) are scoped independently.
//!
//! INSERTs with an explicit column list gain the tenant column and value,
//! unless the caller already supplies the column.

use interpose_core::{DbType, TenancyConfig, TenantValueSource};
use serde_json::Value;
use sqlparser::ast::{
    BinaryOperator, Delete, Expr, Ident, Insert, JoinConstraint, JoinOperator, ObjectName, Query,
    Select, SelectItem, SetExpr, TableAlias, TableFactor, TableWithJoins, Update, VisitMut,
    VisitorMut,
};
use std::cell::RefCell;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::InnerInterceptor;
use crate::context::{BoundSql, MappedStatement, RequestContext};
use crate::error::RewriteError;
use crate::executor::ConnectionInfo;
use crate::parser::{
    base_table_name, delete_tables, delete_using_tables, insert_table_name, name_idents,
    update_from_tables, StatementClassifier,
    StatementHandler, StatementKind,
};

/// Supplies the tenant column, ignore list and per-request tenant value.
pub trait TenantLineHandler: Send + Sync {
    /// Tenant column for a table.
    fn tenant_column(&self, table: &str) -> String;

    /// Whether the table is shared across tenants.
    fn ignore_table(&self, _table: &str) -> bool {
        false
    }

    /// The tenant value expression for the current request.
    fn tenant_value(&self, ctx: &RequestContext) -> Result<Expr, RewriteError>;

    /// Whether an INSERT already carries the tenant column.
    fn ignore_insert(&self, columns: &[Ident], tenant_column: &str) -> bool {
        columns
            .iter()
            .any(|c| c.value.eq_ignore_ascii_case(tenant_column))
    }
}

/// [`TenantLineHandler`] driven by a [`TenancyConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredTenantHandler {
    config: TenancyConfig,
    classifier: StatementClassifier,
}

impl ConfiguredTenantHandler {
    pub fn new(config: TenancyConfig, db_type: DbType) -> Self {
        Self {
            config,
            classifier: StatementClassifier::new(db_type),
        }
    }
}

impl TenantLineHandler for ConfiguredTenantHandler {
    fn tenant_column(&self, table: &str) -> String {
        self.config
            .get_tenant_column(table)
            .unwrap_or(&self.config.column)
            .to_string()
    }

    fn ignore_table(&self, table: &str) -> bool {
        self.config.is_ignored_table(table)
    }

    fn tenant_value(&self, ctx: &RequestContext) -> Result<Expr, RewriteError> {
        let text = match &self.config.value {
            TenantValueSource::Literal(literal) => literal.clone(),
            TenantValueSource::Attribute(name) => {
                let value = ctx.attribute(name).ok_or(RewriteError::MissingTenantValue)?;
                sql_literal(value)?
            }
        };
        self.classifier.parse_expr(&text)
    }
}

/// Render a request attribute as a SQL literal.
fn sql_literal(value: &Value) -> Result<String, RewriteError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        Value::Bool(true) => Ok("TRUE".to_string()),
        Value::Bool(false) => Ok("FALSE".to_string()),
        Value::Null => Err(RewriteError::MissingTenantValue),
        Value::Array(_) | Value::Object(_) => Err(RewriteError::unsupported(
            "tenant value must be a scalar",
        )),
    }
}

/// Per-table scoping decision, recomputed for every statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantRule {
    pub ignore: bool,
    pub column: String,
    /// `None` when the table is ignored.
    pub value: Option<Expr>,
}

/// Result of tenant injection.
#[derive(Debug, Clone)]
pub struct InjectionResult {
    /// The original SQL statement.
    pub original_sql: String,
    /// The rewritten SQL with tenant predicates.
    pub rewritten_sql: String,
    /// Tables that were scoped, in visit order.
    pub tables_scoped: Vec<String>,
    /// The predicates and insert columns that were added.
    pub predicates_added: Vec<String>,
}

/// Injects tenant predicates into SQL statements.
#[derive(Clone)]
pub struct TenantPredicateInjector {
    classifier: StatementClassifier,
    handler: Arc<dyn TenantLineHandler>,
}

impl TenantPredicateInjector {
    pub fn new(classifier: StatementClassifier, handler: Arc<dyn TenantLineHandler>) -> Self {
        Self {
            classifier,
            handler,
        }
    }

    /// Injector backed by a [`ConfiguredTenantHandler`].
    pub fn from_config(db_type: DbType, config: TenancyConfig) -> Self {
        Self::new(
            StatementClassifier::new(db_type),
            Arc::new(ConfiguredTenantHandler::new(config, db_type)),
        )
    }

    /// Inject tenant predicates into every statement of `sql`.
    pub fn inject(&self, sql: &str, ctx: &RequestContext) -> Result<InjectionResult, RewriteError> {
        let mut batch = self.classifier.parse_batch(sql)?;
        let scope = TenantScope::new(self.handler.as_ref(), ctx);
        batch.apply(&scope)?;

        let (tables_scoped, predicates_added) = scope.into_report();
        Ok(InjectionResult {
            original_sql: sql.to_string(),
            rewritten_sql: batch.to_sql(),
            tables_scoped,
            predicates_added,
        })
    }
}

/// Per-call injection state.
struct TenantScope<'a> {
    handler: &'a dyn TenantLineHandler,
    ctx: &'a RequestContext,
    value: RefCell<Option<Expr>>,
    tables: RefCell<Vec<String>>,
    predicates: RefCell<Vec<String>>,
}

impl<'a> TenantScope<'a> {
    fn new(handler: &'a dyn TenantLineHandler, ctx: &'a RequestContext) -> Self {
        Self {
            handler,
            ctx,
            value: RefCell::new(None),
            tables: RefCell::new(Vec::new()),
            predicates: RefCell::new(Vec::new()),
        }
    }

    fn into_report(self) -> (Vec<String>, Vec<String>) {
        (self.tables.into_inner(), self.predicates.into_inner())
    }

    /// The tenant value, resolved on first use so statements touching only
    /// ignored tables never need one.
    fn value(&self) -> Result<Expr, RewriteError> {
        if let Some(value) = self.value.borrow().as_ref() {
            return Ok(value.clone());
        }
        let value = self.handler.tenant_value(self.ctx)?;
        *self.value.borrow_mut() = Some(value.clone());
        Ok(value)
    }

    fn rule(&self, table: &str) -> Result<TenantRule, RewriteError> {
        let column = self.handler.tenant_column(table);
        if self.handler.ignore_table(table) {
            return Ok(TenantRule {
                ignore: true,
                column,
                value: None,
            });
        }
        Ok(TenantRule {
            ignore: false,
            column,
            value: Some(self.value()?),
        })
    }

    /// Predicate for one table reference, or `None` if it is not scoped.
    fn predicate_for(
        &self,
        name: &ObjectName,
        alias: Option<&TableAlias>,
    ) -> Result<Option<Expr>, RewriteError> {
        let Some(table) = base_table_name(name) else {
            return Ok(None);
        };
        let rule = self.rule(&table)?;
        let Some(value) = rule.value.filter(|_| !rule.ignore) else {
            tracing::debug!(table = %table, "Skipping tenant scoping for ignored table");
            return Ok(None);
        };

        let mut path = match alias {
            Some(alias) => vec![alias.name.clone()],
            None => name_idents(name),
        };
        path.push(Ident::new(rule.column));
        let predicate = Expr::BinaryOp {
            left: Box::new(Expr::CompoundIdentifier(path)),
            op: BinaryOperator::Eq,
            right: Box::new(value),
        };

        self.tables.borrow_mut().push(table);
        self.predicates.borrow_mut().push(predicate.to_string());
        Ok(Some(predicate))
    }

    fn scope_queries<T: VisitMut>(&self, node: &mut T) -> Result<(), RewriteError> {
        let mut scoper = QueryScoper {
            scope: self,
            cte_names: Vec::new(),
        };
        match node.visit(&mut scoper) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(err) => Err(err),
        }
    }
}

impl StatementHandler for TenantScope<'_> {
    fn on_select(&self, query: &mut Query, _index: usize) -> Result<(), RewriteError> {
        self.scope_queries(query)
    }

    fn on_update(&self, update: &mut Update, _index: usize) -> Result<(), RewriteError> {
        self.scope_queries(update)?;
        let scoper = QueryScoper::top_level(self);
        let mut predicates = Vec::new();
        scoper.scope_table_with_joins(&mut update.table, &mut predicates)?;
        for table in update_from_tables(update) {
            scoper.scope_table_with_joins(table, &mut predicates)?;
        }
        and_into(&mut update.selection, predicates);
        Ok(())
    }

    fn on_delete(&self, delete: &mut Delete, _index: usize) -> Result<(), RewriteError> {
        self.scope_queries(delete)?;
        let scoper = QueryScoper::top_level(self);
        let mut predicates = Vec::new();
        for table in delete_tables(delete).iter_mut() {
            scoper.scope_table_with_joins(table, &mut predicates)?;
        }
        for table in delete_using_tables(delete) {
            scoper.scope_table_with_joins(table, &mut predicates)?;
        }
        and_into(&mut delete.selection, predicates);
        Ok(())
    }

    fn on_insert(&self, insert: &mut Insert, _index: usize) -> Result<(), RewriteError> {
        let Some(table) = insert_table_name(insert) else {
            return Ok(());
        };
        // The SELECT source of INSERT ... SELECT reads tenant data too.
        self.scope_queries(insert)?;

        if self.handler.ignore_table(&table) {
            return Ok(());
        }
        if insert.columns.is_empty() {
            tracing::warn!(table = %table, "INSERT without column list left unscoped");
            return Ok(());
        }

        let column = self.handler.tenant_column(&table);
        if self.handler.ignore_insert(&insert.columns, &column) {
            return Ok(());
        }

        let value = self.value()?;
        let source = insert.source.as_mut().ok_or_else(|| {
            RewriteError::unsupported(format!("INSERT into {table} without VALUES or SELECT"))
        })?;
        append_insert_value(&mut source.body, &value)?;
        insert.columns.push(Ident::new(&column));

        self.tables.borrow_mut().push(table);
        self.predicates.borrow_mut().push(format!("{column} = {value}"));
        Ok(())
    }
}

fn append_insert_value(body: &mut SetExpr, value: &Expr) -> Result<(), RewriteError> {
    match body {
        SetExpr::Values(values) => {
            for row in &mut values.rows {
                row.push(value.clone());
            }
            Ok(())
        }
        SetExpr::Select(select) => {
            select.projection.push(SelectItem::UnnamedExpr(value.clone()));
            Ok(())
        }
        SetExpr::Query(query) => append_insert_value(&mut query.body, value),
        SetExpr::SetOperation { left, right, .. } => {
            append_insert_value(left, value)?;
            append_insert_value(right, value)
        }
        other => Err(RewriteError::unsupported(format!(
            "cannot add tenant column to INSERT source: {other}"
        ))),
    }
}

/// Walks every query of a statement, innermost first.
struct QueryScoper<'s, 'a> {
    scope: &'s TenantScope<'a>,
    /// CTE names in scope, one frame per enclosing query.
    cte_names: Vec<Vec<String>>,
}

impl<'s, 'a> QueryScoper<'s, 'a> {
    fn top_level(scope: &'s TenantScope<'a>) -> Self {
        Self {
            scope,
            cte_names: Vec::new(),
        }
    }

    fn is_cte(&self, name: &ObjectName) -> bool {
        let idents = name_idents(name);
        let [ident] = idents.as_slice() else {
            return false;
        };
        let lowered = ident.value.to_ascii_lowercase();
        self.cte_names
            .iter()
            .any(|frame| frame.iter().any(|cte| *cte == lowered))
    }

    fn scope_set_expr(&self, body: &mut SetExpr) -> Result<(), RewriteError> {
        match body {
            SetExpr::Select(select) => self.scope_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.scope_set_expr(left)?;
                self.scope_set_expr(right)
            }
            // Nested queries are visited on their own.
            _ => Ok(()),
        }
    }

    fn scope_select(&self, select: &mut Select) -> Result<(), RewriteError> {
        let mut predicates = Vec::new();
        for table in &mut select.from {
            self.scope_table_with_joins(table, &mut predicates)?;
        }
        and_into(&mut select.selection, predicates);
        Ok(())
    }

    /// Scopes one FROM item. Predicates of tables on the preserved side of
    /// every join go to `where_predicates`; predicates of a nullable side are
    /// ANDed into that join's ON so outer rows survive.
    fn scope_table_with_joins(
        &self,
        table: &mut TableWithJoins,
        where_predicates: &mut Vec<Expr>,
    ) -> Result<(), RewriteError> {
        // Predicates of everything left of the current join.
        let mut preserved = Vec::new();
        self.scope_factor(&mut table.relation, &mut preserved)?;
        for join in &mut table.joins {
            let mut joined = Vec::new();
            self.scope_factor(&mut join.relation, &mut joined)?;
            match &mut join.join_operator {
                JoinOperator::Left(constraint) | JoinOperator::LeftOuter(constraint) => {
                    constrain_outer_join(constraint, joined, "LEFT")?;
                }
                JoinOperator::Right(constraint) | JoinOperator::RightOuter(constraint) => {
                    let nullable = std::mem::take(&mut preserved);
                    constrain_outer_join(constraint, nullable, "RIGHT")?;
                    preserved.extend(joined);
                }
                JoinOperator::FullOuter(_) => {
                    if !preserved.is_empty() || !joined.is_empty() {
                        return Err(RewriteError::unsupported(
                            "FULL JOIN over tenant tables cannot be scoped without dropping rows",
                        ));
                    }
                }
                _ => preserved.extend(joined),
            }
        }
        where_predicates.extend(preserved);
        Ok(())
    }

    fn scope_factor(
        &self,
        factor: &mut TableFactor,
        predicates: &mut Vec<Expr>,
    ) -> Result<(), RewriteError> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                // Table-valued functions have no tenant column.
                if args.is_some() || self.is_cte(name) {
                    return Ok(());
                }
                if let Some(predicate) = self.scope.predicate_for(name, alias.as_ref())? {
                    predicates.push(predicate);
                }
                Ok(())
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.scope_table_with_joins(table_with_joins, predicates),
            // Derived tables are visited as queries; UNNEST and friends are
            // not scoped.
            _ => Ok(()),
        }
    }
}

impl VisitorMut for QueryScoper<'_, '_> {
    type Break = RewriteError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        let names = query
            .with
            .as_ref()
            .map(|with| {
                with.cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        self.cte_names.push(names);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        let result = self.scope_set_expr(&mut query.body);
        self.cte_names.pop();
        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// AND `predicates` onto `selection`, parenthesizing an existing OR.
/// ANDs the nullable side's predicates into an outer join's ON clause.
fn constrain_outer_join(
    constraint: &mut JoinConstraint,
    predicates: Vec<Expr>,
    join: &str,
) -> Result<(), RewriteError> {
    if predicates.is_empty() {
        return Ok(());
    }
    match constraint {
        JoinConstraint::On(on) => {
            let mut combined = Some(on.clone());
            and_into(&mut combined, predicates);
            if let Some(combined) = combined {
                *on = combined;
            }
            Ok(())
        }
        JoinConstraint::Using(_) | JoinConstraint::Natural => Err(RewriteError::unsupported(
            format!("{join} JOIN with USING or NATURAL over a tenant table; use ON instead"),
        )),
        JoinConstraint::None => Err(RewriteError::unsupported(format!(
            "{join} JOIN without a join condition over a tenant table"
        ))),
    }
}

fn and_into(selection: &mut Option<Expr>, predicates: Vec<Expr>) {
    let Some(scoped) = predicates.into_iter().reduce(and) else {
        return;
    };
    *selection = Some(match selection.take() {
        Some(existing) => and(parenthesize(existing), scoped),
        None => scoped,
    });
}

fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}

fn parenthesize(expr: Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::Or | BinaryOperator::Xor,
            ..
        } => Expr::Nested(Box::new(expr)),
        other => other,
    }
}

/// Pipeline stage applying [`TenantPredicateInjector`] before preparation.
///
/// Injection is not idempotent: a statement already rewritten by this stage
/// is rejected with [`RewriteError::AlreadyRewritten`].
pub struct TenantLineInterceptor {
    name: String,
    injector: TenantPredicateInjector,
}

impl TenantLineInterceptor {
    pub fn new(name: impl Into<String>, injector: TenantPredicateInjector) -> Self {
        Self {
            name: name.into(),
            injector,
        }
    }
}

impl InnerInterceptor for TenantLineInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_prepare(
        &self,
        _connection: &ConnectionInfo,
        _timeout: Option<Duration>,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        if ms.kind == StatementKind::Other {
            return Ok(());
        }
        if bound.is_rewritten_by(&self.name) {
            return Err(RewriteError::AlreadyRewritten {
                stage: self.name.clone(),
            });
        }

        let result = self.injector.inject(&bound.sql, ctx)?;
        tracing::debug!(
            statement = %ms.id,
            original = %result.original_sql,
            rewritten = %result.rewritten_sql,
            tables = ?result.tables_scoped,
            "Statement rewritten with tenant predicates"
        );
        bound.sql = result.rewritten_sql;
        bound.mark_rewritten(&self.name);
        Ok(())
    }
}
