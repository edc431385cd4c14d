//! SQL parsing, classification and shape dispatch.

use interpose_core::DbType;
use sqlparser::ast::{
    Delete, Expr, FromTable, Ident, Insert, ObjectName, ObjectNamePart, Query, Statement,
    TableFactor, TableObject, TableWithJoins, Update, UpdateTableFromKind,
};
use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::fmt;

use crate::error::RewriteError;

/// Statement shapes the rewriting stages distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Insert,
    Select,
    Update,
    Delete,
    /// DDL, SET, SHOW, ...: never rewritten.
    Other,
}

impl StatementKind {
    pub fn of(stmt: &Statement) -> Self {
        match stmt {
            Statement::Query(_) => StatementKind::Select,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Insert => "INSERT",
            StatementKind::Select => "SELECT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// A parsed statement and its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    kind: StatementKind,
    statement: Statement,
}

impl ParsedStatement {
    pub fn new(statement: Statement) -> Self {
        Self {
            kind: StatementKind::of(&statement),
            statement,
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn statement_mut(&mut self) -> &mut Statement {
        &mut self.statement
    }

    pub fn into_statement(self) -> Statement {
        self.statement
    }

    /// Serialize back to SQL text.
    pub fn to_sql(&self) -> String {
        self.statement.to_string()
    }
}

/// Shape-specific rewrite callbacks. Kinds a handler does not override are
/// left untouched.
///
/// `index` is the zero-based position of the statement in its batch.
pub trait StatementHandler {
    fn on_insert(&self, _insert: &mut Insert, _index: usize) -> Result<(), RewriteError> {
        Ok(())
    }

    fn on_select(&self, _query: &mut Query, _index: usize) -> Result<(), RewriteError> {
        Ok(())
    }

    fn on_update(&self, _update: &mut Update, _index: usize) -> Result<(), RewriteError> {
        Ok(())
    }

    fn on_delete(&self, _delete: &mut Delete, _index: usize) -> Result<(), RewriteError> {
        Ok(())
    }
}

/// Route a statement to the handler method for its kind.
pub fn dispatch(
    stmt: &mut ParsedStatement,
    handler: &dyn StatementHandler,
    index: usize,
) -> Result<(), RewriteError> {
    match &mut stmt.statement {
        Statement::Query(query) => handler.on_select(query, index),
        Statement::Insert(insert) => handler.on_insert(insert, index),
        Statement::Update(update) => handler.on_update(update, index),
        Statement::Delete(delete) => handler.on_delete(delete, index),
        _ => Ok(()),
    }
}

/// A semicolon-joined sequence of statements, rewritten one by one.
#[derive(Debug, Clone)]
pub struct BatchRewriteContext {
    statements: Vec<ParsedStatement>,
}

impl BatchRewriteContext {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[ParsedStatement] {
        &self.statements
    }

    pub fn statements_mut(&mut self) -> &mut [ParsedStatement] {
        &mut self.statements
    }

    /// Apply `handler` to every statement. Any failure aborts the batch.
    pub fn apply(&mut self, handler: &dyn StatementHandler) -> Result<(), RewriteError> {
        for (index, stmt) in self.statements.iter_mut().enumerate() {
            dispatch(stmt, handler, index)?;
        }
        Ok(())
    }

    /// Serialize every statement, joined with `;` in original order.
    pub fn to_sql(&self) -> String {
        self.statements
            .iter()
            .map(ParsedStatement::to_sql)
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Parses SQL with the grammar of a configured database type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementClassifier {
    db_type: DbType,
}

impl Default for StatementClassifier {
    fn default() -> Self {
        Self::new(DbType::Other)
    }
}

impl StatementClassifier {
    pub fn new(db_type: DbType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    fn dialect(&self) -> Box<dyn Dialect> {
        match self.db_type {
            DbType::Mysql | DbType::Mariadb => Box::new(MySqlDialect {}),
            DbType::Postgresql => Box::new(PostgreSqlDialect {}),
            DbType::Sqlite => Box::new(SQLiteDialect {}),
            DbType::Sqlserver | DbType::Sqlserver2005 | DbType::Sybase => Box::new(MsSqlDialect {}),
            _ => Box::new(GenericDialect {}),
        }
    }

    fn parse_all(&self, sql: &str) -> Result<Vec<Statement>, RewriteError> {
        let dialect = self.dialect();
        let statements =
            Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| RewriteError::parse(sql, e))?;
        if statements.is_empty() {
            return Err(RewriteError::parse(sql, "no statement found"));
        }
        Ok(statements)
    }

    /// Parse exactly one statement.
    pub fn parse_single(&self, sql: &str) -> Result<ParsedStatement, RewriteError> {
        let mut statements = self.parse_all(sql)?;
        if statements.len() != 1 {
            return Err(RewriteError::parse(
                sql,
                format!("expected one statement, found {}", statements.len()),
            ));
        }
        Ok(ParsedStatement::new(statements.remove(0)))
    }

    /// Parse a semicolon-joined sequence of statements.
    pub fn parse_batch(&self, sql: &str) -> Result<BatchRewriteContext, RewriteError> {
        let statements = self
            .parse_all(sql)?
            .into_iter()
            .map(ParsedStatement::new)
            .collect();
        Ok(BatchRewriteContext { statements })
    }

    /// Parse, apply `handler` to each statement, and reassemble.
    pub fn rewrite(&self, sql: &str, handler: &dyn StatementHandler) -> Result<String, RewriteError> {
        let mut batch = self.parse_batch(sql)?;
        batch.apply(handler)?;
        Ok(batch.to_sql())
    }

    /// Parse a standalone SQL expression, rejecting trailing input.
    pub fn parse_expr(&self, text: &str) -> Result<Expr, RewriteError> {
        let dialect = self.dialect();
        let mut parser = Parser::new(dialect.as_ref())
            .try_with_sql(text)
            .map_err(|e| RewriteError::parse(text, e))?;
        let expr = parser.parse_expr().map_err(|e| RewriteError::parse(text, e))?;
        if parser.peek_token().token != Token::EOF {
            return Err(RewriteError::parse(text, "unexpected input after expression"));
        }
        Ok(expr)
    }
}

/// Identifier parts of an object name.
pub(crate) fn name_idents(name: &ObjectName) -> Vec<Ident> {
    name.0
        .iter()
        .filter_map(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.clone()),
            _ => None,
        })
        .collect()
}

/// Unqualified table name (last identifier), unquoted.
pub(crate) fn base_table_name(name: &ObjectName) -> Option<String> {
    name_idents(name).last().map(|ident| ident.value.clone())
}

/// Table name of an INSERT target, if it is a plain name.
pub(crate) fn insert_table_name(insert: &Insert) -> Option<String> {
    match &insert.table {
        TableObject::TableName(name) => base_table_name(name),
        _ => None,
    }
}

/// Tables listed in a DELETE's FROM clause.
pub(crate) fn delete_tables(delete: &mut Delete) -> &mut Vec<TableWithJoins> {
    match &mut delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    }
}

/// Tables joined in by `UPDATE ... FROM` (PostgreSQL, SQL Server, SQLite).
pub(crate) fn update_from_tables(update: &mut Update) -> &mut [TableWithJoins] {
    match &mut update.from {
        Some(UpdateTableFromKind::BeforeSet(tables) | UpdateTableFromKind::AfterSet(tables)) => {
            tables.as_mut_slice()
        }
        None => &mut [],
    }
}

/// Tables joined in by `DELETE ... USING`.
pub(crate) fn delete_using_tables(delete: &mut Delete) -> &mut [TableWithJoins] {
    match &mut delete.using {
        Some(tables) => tables.as_mut_slice(),
        None => &mut [],
    }
}

/// Name of the first plain table referenced by an UPDATE or DELETE.
pub(crate) fn target_table_name(stmt: &Statement) -> Option<String> {
    let relation = match stmt {
        Statement::Update(update) => &update.table.relation,
        Statement::Delete(delete) => match &delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => {
                &tables.first()?.relation
            }
        },
        _ => return None,
    };
    match relation {
        TableFactor::Table { name, .. } => base_table_name(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_statements() {
        let classifier = StatementClassifier::default();
        let cases = [
            ("SELECT * FROM users", StatementKind::Select),
            ("INSERT INTO users (id) VALUES (1)", StatementKind::Insert),
            ("UPDATE users SET name = 'a' WHERE id = 1", StatementKind::Update),
            ("DELETE FROM users WHERE id = 1", StatementKind::Delete),
            ("CREATE TABLE t (id INT)", StatementKind::Other),
        ];
        for (sql, kind) in cases {
            assert_eq!(classifier.parse_single(sql).unwrap().kind(), kind, "{sql}");
        }
    }

    #[test]
    fn test_round_trip_without_rewrite() {
        let classifier = StatementClassifier::new(DbType::Mysql);
        let corpus = [
            "SELECT * FROM orders WHERE status = 'open'",
            "SELECT o.id, u.name FROM orders AS o JOIN users AS u ON o.user_id = u.id WHERE o.total > ?",
            "SELECT COUNT(*) FROM orders GROUP BY status HAVING COUNT(*) > 1",
            "SELECT * FROM (SELECT id FROM a) AS x WHERE x.id IN (SELECT id FROM b)",
            "INSERT INTO users (id, name) VALUES (?, ?), (?, ?)",
            "UPDATE users SET name = ? WHERE id = ?",
            "DELETE FROM users WHERE id = ?",
            "SELECT a FROM t1 UNION ALL SELECT a FROM t2 ORDER BY a",
        ];
        for sql in corpus {
            let parsed = classifier.parse_single(sql).unwrap();
            let again = classifier.parse_single(&parsed.to_sql()).unwrap();
            assert_eq!(parsed, again, "{sql}");
            assert_eq!(parsed.to_sql(), sql);
        }
    }

    #[test]
    fn test_parse_error_keeps_sql() {
        let classifier = StatementClassifier::default();
        match classifier.parse_single("SELEC * FORM t") {
            Err(RewriteError::ParseError { sql, .. }) => assert_eq!(sql, "SELEC * FORM t"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_single_rejects_batch() {
        let classifier = StatementClassifier::default();
        assert!(classifier.parse_single("SELECT 1; SELECT 2").is_err());
        assert!(classifier.parse_single("   ").is_err());
    }

    #[test]
    fn test_batch_preserves_order_and_count() {
        let classifier = StatementClassifier::default();
        struct Noop;
        impl StatementHandler for Noop {}

        let out = classifier
            .rewrite("DELETE FROM a WHERE x=1; SELECT 1", &Noop)
            .unwrap();
        let parts: Vec<_> = out.split(';').collect();
        assert_eq!(parts, vec!["DELETE FROM a WHERE x = 1", "SELECT 1"]);
    }

    #[test]
    fn test_batch_aborts_on_any_failure() {
        let classifier = StatementClassifier::default();
        assert!(classifier.parse_batch("SELECT 1; SELEC 2").is_err());
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        use std::cell::RefCell;

        #[derive(Default)]
        struct Recorder {
            seen: RefCell<Vec<(StatementKind, usize)>>,
        }
        impl StatementHandler for Recorder {
            fn on_select(&self, _q: &mut Query, index: usize) -> Result<(), RewriteError> {
                self.seen.borrow_mut().push((StatementKind::Select, index));
                Ok(())
            }
            fn on_delete(&self, _d: &mut Delete, index: usize) -> Result<(), RewriteError> {
                self.seen.borrow_mut().push((StatementKind::Delete, index));
                Ok(())
            }
        }

        let classifier = StatementClassifier::default();
        let recorder = Recorder::default();
        let mut batch = classifier
            .parse_batch("SELECT 1; UPDATE t SET a = 1; DELETE FROM t")
            .unwrap();
        batch.apply(&recorder).unwrap();
        assert_eq!(
            recorder.seen.into_inner(),
            vec![(StatementKind::Select, 0), (StatementKind::Delete, 2)]
        );
    }

    #[test]
    fn test_parse_expr() {
        let classifier = StatementClassifier::default();
        assert_eq!(classifier.parse_expr("7").unwrap().to_string(), "7");
        assert_eq!(classifier.parse_expr("'acme'").unwrap().to_string(), "'acme'");
        assert!(classifier.parse_expr("7 7").is_err());
    }

    #[test]
    fn test_target_table_name() {
        let classifier = StatementClassifier::default();
        let update = classifier.parse_single("UPDATE app.users SET a = 1").unwrap();
        assert_eq!(target_table_name(update.statement()), Some("users".to_string()));
        let delete = classifier.parse_single("DELETE FROM orders").unwrap();
        assert_eq!(target_table_name(delete.statement()), Some("orders".to_string()));
    }
}
