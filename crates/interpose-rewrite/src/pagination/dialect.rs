//! Per-dialect pagination SQL.
//!
//! Every dialect wraps or appends to the original statement and reports the
//! placeholders it added as [`ParamSlot`]s, in the order they appear in the
//! output text. Slots either precede all of the original statement's
//! placeholders ([`SlotPosition::Leading`]) or follow them
//! ([`SlotPosition::Trailing`]).

use interpose_core::DbType;
use serde::Serialize;
use serde_json::Value;

use sqlparser::ast::{Query, SelectItem, SetExpr, Statement};

use crate::error::RewriteError;
use crate::parser::StatementClassifier;

/// How a placeholder consumes the requested page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeKind {
    Offset,
    Limit,
    /// `offset + limit`, for dialects that bound the upper row number.
    Combined,
}

/// Where a slot sits relative to the original statement's placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPosition {
    Leading,
    Trailing,
}

/// One placeholder added by a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSlot {
    pub value: u64,
    pub kind: ConsumeKind,
    pub position: SlotPosition,
}

impl ParamSlot {
    fn trailing(value: u64, kind: ConsumeKind) -> Self {
        Self {
            value,
            kind,
            position: SlotPosition::Trailing,
        }
    }

    fn leading(value: u64, kind: ConsumeKind) -> Self {
        Self {
            value,
            kind,
            position: SlotPosition::Leading,
        }
    }
}

/// Paginated SQL plus the slots its added placeholders bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialectModel {
    pub sql: String,
    pub slots: Vec<ParamSlot>,
}

impl DialectModel {
    /// True when a single slot carries the whole page bound.
    pub fn is_single_slot(&self) -> bool {
        self.slots.len() == 1
    }

    /// `(value, kind)` pairs in textual order.
    pub fn consumers(&self) -> Vec<(u64, ConsumeKind)> {
        self.slots.iter().map(|s| (s.value, s.kind)).collect()
    }

    /// Full parameter list: leading slots, the original parameters, then
    /// trailing slots.
    pub fn bind(&self, original: &[Value]) -> Vec<Value> {
        let slot_values = |position: SlotPosition| {
            self.slots
                .iter()
                .filter(move |s| s.position == position)
                .map(|s| Value::from(s.value))
        };
        slot_values(SlotPosition::Leading)
            .chain(original.iter().cloned())
            .chain(slot_values(SlotPosition::Trailing))
            .collect()
    }
}

/// Builds paginated SQL for one database family.
///
/// Only an unbounded SELECT can be paginated: statements already carrying
/// LIMIT, FETCH or TOP are rejected rather than given a second bound.
pub trait PaginationDialect: Send + Sync {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError>;
}

/// `LIMIT ?` / `LIMIT ?,?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl PaginationDialect for MySqlDialect {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError> {
        page_query(DbType::Mysql, sql)?;
        let sql = trim_statement(sql);
        if offset == 0 {
            return Ok(DialectModel {
                sql: format!("{sql} LIMIT ?"),
                slots: vec![ParamSlot::trailing(limit, ConsumeKind::Limit)],
            });
        }
        Ok(DialectModel {
            sql: format!("{sql} LIMIT ?,?"),
            slots: vec![
                ParamSlot::trailing(offset, ConsumeKind::Offset),
                ParamSlot::trailing(limit, ConsumeKind::Limit),
            ],
        })
    }
}

/// `LIMIT ?` / `LIMIT ? OFFSET ?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PaginationDialect for PostgresDialect {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError> {
        page_query(DbType::Postgresql, sql)?;
        let sql = trim_statement(sql);
        if offset == 0 {
            return Ok(DialectModel {
                sql: format!("{sql} LIMIT ?"),
                slots: vec![ParamSlot::trailing(limit, ConsumeKind::Limit)],
            });
        }
        Ok(DialectModel {
            sql: format!("{sql} LIMIT ? OFFSET ?"),
            slots: vec![
                ParamSlot::trailing(limit, ConsumeKind::Limit),
                ParamSlot::trailing(offset, ConsumeKind::Offset),
            ],
        })
    }
}

/// `ROWNUM` wrapping for Oracle before 12c.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl PaginationDialect for OracleDialect {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError> {
        page_query(DbType::Oracle, sql)?;
        let sql = trim_statement(sql);
        if offset == 0 {
            return Ok(DialectModel {
                sql: format!("SELECT * FROM ( {sql} ) WHERE ROWNUM <= ?"),
                slots: vec![ParamSlot::trailing(limit, ConsumeKind::Limit)],
            });
        }
        Ok(DialectModel {
            sql: format!(
                "SELECT * FROM ( SELECT TMP.*, ROWNUM ROW_ID FROM ( {sql} ) TMP WHERE ROWNUM <= ? ) WHERE ROW_ID > ?"
            ),
            slots: vec![
                ParamSlot::trailing(offset.saturating_add(limit), ConsumeKind::Combined),
                ParamSlot::trailing(offset, ConsumeKind::Offset),
            ],
        })
    }
}

/// `OFFSET ? ROWS FETCH NEXT ? ROWS ONLY` (Oracle 12c, SQL Server 2012, DB2).
///
/// SQL Server only accepts OFFSET after an ORDER BY, so for it an unordered
/// statement is ordered by `CURRENT_TIMESTAMP`, which leaves row order
/// unspecified.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetFetchDialect {
    pub sql_server: bool,
}

impl PaginationDialect for OffsetFetchDialect {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError> {
        let parse_as = if self.sql_server {
            DbType::Sqlserver
        } else {
            DbType::Oracle12c
        };
        let query = page_query(parse_as, sql)?;
        let sql = trim_statement(sql);
        let order_by = if self.sql_server && query.order_by.is_none() {
            " ORDER BY CURRENT_TIMESTAMP"
        } else {
            ""
        };
        if offset == 0 {
            return Ok(DialectModel {
                sql: format!("{sql}{order_by} OFFSET 0 ROWS FETCH NEXT ? ROWS ONLY"),
                slots: vec![ParamSlot::trailing(limit, ConsumeKind::Limit)],
            });
        }
        Ok(DialectModel {
            sql: format!("{sql}{order_by} OFFSET ? ROWS FETCH NEXT ? ROWS ONLY"),
            slots: vec![
                ParamSlot::trailing(offset, ConsumeKind::Offset),
                ParamSlot::trailing(limit, ConsumeKind::Limit),
            ],
        })
    }
}

/// `TOP (?)` over `ROW_NUMBER()` for SQL Server 2005 and Sybase.
///
/// A derived table may not carry ORDER BY, so the statement's ORDER BY moves
/// into `ROW_NUMBER() OVER (...)` and the page is ordered by that row number.
/// Statements without ORDER BY have no stable page boundaries and are
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopDialect;

impl PaginationDialect for TopDialect {
    fn build_pagination_sql(
        &self,
        sql: &str,
        offset: u64,
        limit: u64,
    ) -> Result<DialectModel, RewriteError> {
        let numbered = number_rows(page_query(DbType::Sqlserver2005, sql)?)?;
        if offset == 0 {
            return Ok(DialectModel {
                sql: format!("SELECT TOP (?) * FROM ( {numbered} ) TMP_PAGE ORDER BY ROW_ID"),
                slots: vec![ParamSlot::leading(limit, ConsumeKind::Limit)],
            });
        }
        Ok(DialectModel {
            sql: format!(
                "SELECT TOP (?) * FROM ( {numbered} ) TMP_PAGE WHERE ROW_ID > ? ORDER BY ROW_ID"
            ),
            slots: vec![
                ParamSlot::leading(limit, ConsumeKind::Limit),
                ParamSlot::trailing(offset, ConsumeKind::Offset),
            ],
        })
    }
}

/// The statement as an unbounded SELECT.
fn page_query(db_type: DbType, sql: &str) -> Result<Box<Query>, RewriteError> {
    let parsed = StatementClassifier::new(db_type).parse_single(sql)?;
    let Statement::Query(query) = parsed.into_statement() else {
        return Err(RewriteError::unsupported("only a SELECT can be paginated"));
    };
    let top = matches!(query.body.as_ref(), SetExpr::Select(select) if select.top.is_some());
    if query.limit_clause.is_some() || query.fetch.is_some() || top {
        return Err(RewriteError::unsupported(
            "statement is already bounded by LIMIT, FETCH or TOP",
        ));
    }
    Ok(query)
}

/// Moves the ORDER BY into a `ROW_ID` column numbering the rows.
fn number_rows(mut query: Box<Query>) -> Result<String, RewriteError> {
    if query.with.is_some() {
        return Err(RewriteError::unsupported(
            "TOP pagination cannot wrap a statement with a WITH clause",
        ));
    }
    let Some(order_by) = query.order_by.take() else {
        return Err(RewriteError::unsupported(
            "TOP pagination needs an ORDER BY to number rows",
        ));
    };
    let row_number = row_number_item(&order_by.to_string())?;
    // Numbered inside the SELECT itself so qualified ORDER BY terms still
    // resolve.
    if let SetExpr::Select(select) = query.body.as_mut() {
        if select.distinct.is_none() {
            select.projection.push(row_number);
            return Ok(query.to_string());
        }
    }
    Ok(format!("SELECT *, {row_number} FROM ( {query} ) TMP_ROWS"))
}

fn row_number_item(order_by: &str) -> Result<SelectItem, RewriteError> {
    let sql = format!("SELECT ROW_NUMBER() OVER ({order_by}) AS ROW_ID");
    let parsed = StatementClassifier::new(DbType::Sqlserver2005).parse_single(&sql)?;
    if let Statement::Query(query) = parsed.statement() {
        if let SetExpr::Select(select) = query.body.as_ref() {
            if let Some(item) = select.projection.first() {
                return Ok(item.clone());
            }
        }
    }
    Err(RewriteError::parse(&sql, "row number projection did not parse"))
}

static MYSQL: MySqlDialect = MySqlDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static ORACLE: OracleDialect = OracleDialect;
static OFFSET_FETCH: OffsetFetchDialect = OffsetFetchDialect { sql_server: false };
static SQLSERVER_OFFSET_FETCH: OffsetFetchDialect = OffsetFetchDialect { sql_server: true };
static TOP: TopDialect = TopDialect;

/// The pagination dialect for a database type.
pub fn dialect_for(db_type: DbType) -> Result<&'static dyn PaginationDialect, RewriteError> {
    let dialect: &'static dyn PaginationDialect = match db_type {
        DbType::Mysql | DbType::Mariadb | DbType::Sqlite => &MYSQL,
        DbType::Postgresql | DbType::H2 | DbType::Hsql => &POSTGRES,
        DbType::Oracle => &ORACLE,
        DbType::Oracle12c | DbType::Db2 => &OFFSET_FETCH,
        DbType::Sqlserver => &SQLSERVER_OFFSET_FETCH,
        DbType::Sqlserver2005 | DbType::Sybase => &TOP,
        DbType::Other => return Err(RewriteError::UnsupportedDialect { db_type }),
    };
    Ok(dialect)
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}
