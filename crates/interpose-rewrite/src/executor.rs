//! The statement executor the pipeline wraps.
//!
//! Interpose never talks to a database itself. Callers hand the chain an
//! [`Executor`]; stages may use it for auxiliary statements (the pagination
//! stage runs its count query through it) and the chain uses it for the
//! rewritten statement.

use serde::Serialize;
use serde_json::Value;

/// Connection metadata handed to `before_prepare` hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// JDBC-style or native connection URL, e.g. `postgres://db/app`.
    pub url: String,
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// A result with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as an unsigned integer.
    ///
    /// Numeric strings are accepted since some drivers report `COUNT(*)` as
    /// text.
    pub fn scalar_u64(&self) -> Option<u64> {
        match self.rows.first()?.first()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Outcome of executing one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteResult {
    Rows(ResultSet),
    Affected(u64),
}

/// Raw SQL executor.
pub trait Executor: Send + Sync {
    /// Metadata about the connection statements will run on.
    fn connection(&self) -> ConnectionInfo;

    /// Execute `sql` with positional parameters.
    fn execute(&self, sql: &str, parameters: &[Value]) -> anyhow::Result<ExecuteResult>;

    /// Execute a statement expected to return rows.
    fn query(&self, sql: &str, parameters: &[Value]) -> anyhow::Result<ResultSet> {
        match self.execute(sql, parameters)? {
            ExecuteResult::Rows(rows) => Ok(rows),
            ExecuteResult::Affected(count) => {
                anyhow::bail!("expected rows, statement affected {count} rows")
            }
        }
    }

    /// Execute a statement expected to report an affected-row count.
    fn update(&self, sql: &str, parameters: &[Value]) -> anyhow::Result<u64> {
        match self.execute(sql, parameters)? {
            ExecuteResult::Affected(count) => Ok(count),
            ExecuteResult::Rows(_) => anyhow::bail!("expected an update count, got rows"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(ExecuteResult);

    impl Executor for Fixed {
        fn connection(&self) -> ConnectionInfo {
            ConnectionInfo::new("mysql://localhost/app")
        }

        fn execute(&self, _sql: &str, _parameters: &[Value]) -> anyhow::Result<ExecuteResult> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_scalar_u64() {
        let numeric = ResultSet {
            columns: vec!["total".to_string()],
            rows: vec![vec![json!(42)]],
        };
        assert_eq!(numeric.scalar_u64(), Some(42));

        let text = ResultSet {
            columns: vec!["total".to_string()],
            rows: vec![vec![json!(" 7 ")]],
        };
        assert_eq!(text.scalar_u64(), Some(7));
        assert_eq!(ResultSet::empty().scalar_u64(), None);
    }

    #[test]
    fn test_query_and_update_helpers() {
        let rows = Fixed(ExecuteResult::Rows(ResultSet::empty()));
        assert!(rows.query("SELECT 1", &[]).is_ok());
        assert!(rows.update("SELECT 1", &[]).is_err());

        let affected = Fixed(ExecuteResult::Affected(3));
        assert_eq!(affected.update("DELETE FROM t", &[]).unwrap(), 3);
        assert!(affected.query("DELETE FROM t", &[]).is_err());
    }
}
