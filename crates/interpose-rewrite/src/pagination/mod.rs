//! Physical pagination.
//!
//! The stage runs in two steps. `will_query` issues the count query through
//! the executor, records the total on the page request and short-circuits
//! pages that are provably empty. `before_query` rewrites the statement for
//! the dialect and binds the page parameters around the original ones.

pub mod count;
pub mod dialect;

pub use count::count_sql;
pub use dialect::{
    dialect_for, ConsumeKind, DialectModel, MySqlDialect, OffsetFetchDialect, OracleDialect,
    PaginationDialect, ParamSlot, PostgresDialect, SlotPosition, TopDialect,
};

use interpose_core::{DbType, PaginationConfig};

use crate::chain::InnerInterceptor;
use crate::context::{BoundSql, MappedStatement, PageRequest, RequestContext};
use crate::error::RewriteError;
use crate::executor::Executor;
use crate::parser::StatementClassifier;

/// Pagination stage.
pub struct PaginationInterceptor {
    name: String,
    config: PaginationConfig,
}

impl PaginationInterceptor {
    pub fn new(name: impl Into<String>, config: PaginationConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Configured database type, else the one detected from the connection.
    fn db_type(&self, executor: &dyn Executor) -> DbType {
        self.config
            .db_type
            .unwrap_or_else(|| DbType::from_url(&executor.connection().url))
    }

    /// Page size after applying the request's or the stage's cap.
    fn effective_size(&self, page: &PageRequest) -> u64 {
        match page.max_limit.or(self.config.max_limit) {
            Some(max) => page.size.min(max),
            None => page.size,
        }
    }

    fn offset(&self, page: &PageRequest) -> u64 {
        page.current
            .saturating_sub(1)
            .saturating_mul(self.effective_size(page))
    }
}

impl InnerInterceptor for PaginationInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn will_query(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        bound: &BoundSql,
        ctx: &mut RequestContext,
    ) -> Result<bool, RewriteError> {
        let Some(page) = ctx.page() else {
            return Ok(true);
        };
        if page.size == 0 || !page.search_count {
            return Ok(true);
        }
        let offset = self.offset(page);

        let classifier = StatementClassifier::new(self.db_type(executor));
        let count = count_sql(&classifier, &bound.sql, self.config.optimize_count)?;
        let total = executor
            .query(&count, &bound.parameters)
            .map_err(RewriteError::Executor)?
            .scalar_u64()
            .unwrap_or(0);
        tracing::debug!(statement = %ms.id, count = %count, total, "Counted page total");

        let Some(page) = ctx.page_mut() else {
            return Ok(true);
        };
        page.total = Some(total);

        if total == 0 {
            tracing::debug!(statement = %ms.id, "Empty result, skipping page query");
            return Ok(false);
        }
        if offset >= total {
            if !self.config.overflow {
                tracing::debug!(statement = %ms.id, offset, total, "Page past the end, skipping page query");
                return Ok(false);
            }
            page.current = 1;
        }
        Ok(true)
    }

    fn before_query(
        &self,
        executor: &dyn Executor,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        ctx: &mut RequestContext,
    ) -> Result<(), RewriteError> {
        let Some(page) = ctx.page() else {
            return Ok(());
        };
        if page.size == 0 {
            return Ok(());
        }

        let limit = self.effective_size(page);
        let offset = self.offset(page);
        let dialect = dialect_for(self.db_type(executor))?;
        let model = dialect.build_pagination_sql(&bound.sql, offset, limit)?;

        tracing::debug!(
            statement = %ms.id,
            offset,
            limit,
            paginated = %model.sql,
            "Statement paginated"
        );
        bound.parameters = model.bind(&bound.parameters);
        bound.sql = model.sql;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::count_placeholders;
    use crate::executor::{ConnectionInfo, ExecuteResult, ResultSet};
    use crate::parser::StatementKind;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct CountingExecutor {
        url: &'static str,
        total: u64,
        seen: Mutex<Vec<String>>,
    }

    impl CountingExecutor {
        fn new(url: &'static str, total: u64) -> Self {
            Self {
                url,
                total,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Executor for CountingExecutor {
        fn connection(&self) -> ConnectionInfo {
            ConnectionInfo::new(self.url)
        }

        fn execute(&self, sql: &str, _parameters: &[Value]) -> anyhow::Result<ExecuteResult> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(ExecuteResult::Rows(ResultSet {
                columns: vec!["total".to_string()],
                rows: vec![vec![json!(self.total)]],
            }))
        }
    }

    fn ms() -> MappedStatement {
        MappedStatement::new("users.page", StatementKind::Select)
    }

    #[test]
    fn test_paginates_with_detected_dialect() {
        let stage = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let executor = CountingExecutor::new("postgres://db/app", 100);
        let mut ctx = RequestContext::new().with_page(PageRequest::new(3, 10));
        let mut bound =
            BoundSql::new("SELECT * FROM users WHERE age > ?").with_parameters(vec![json!(18)]);

        assert!(stage.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());
        assert_eq!(ctx.page().unwrap().total, Some(100));

        stage
            .before_query(&executor, &ms(), &mut bound, &mut ctx)
            .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM users WHERE age > ? LIMIT ? OFFSET ?");
        assert_eq!(bound.parameters, vec![json!(18), json!(10), json!(20)]);
        assert_eq!(count_placeholders(&bound.sql), bound.parameters.len());
    }

    #[test]
    fn test_empty_total_short_circuits() {
        let stage = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let executor = CountingExecutor::new("mysql://db/app", 0);
        let mut ctx = RequestContext::new().with_page(PageRequest::new(1, 10));
        let bound = BoundSql::new("SELECT * FROM users");

        assert!(!stage.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());
        assert_eq!(
            executor.seen.lock().unwrap().as_slice(),
            ["SELECT COUNT(*) AS total FROM users".to_string()]
        );
    }

    #[test]
    fn test_page_past_end() {
        let executor = CountingExecutor::new("mysql://db/app", 15);
        let bound = BoundSql::new("SELECT * FROM users");

        let strict = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let mut ctx = RequestContext::new().with_page(PageRequest::new(3, 10));
        assert!(!strict.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());

        let overflow = PaginationInterceptor::new(
            "pagination",
            PaginationConfig {
                overflow: true,
                ..PaginationConfig::default()
            },
        );
        let mut ctx = RequestContext::new().with_page(PageRequest::new(3, 10));
        assert!(overflow.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());
        assert_eq!(ctx.page().unwrap().current, 1);
    }

    #[test]
    fn test_max_limit_caps_page_size() {
        let stage = PaginationInterceptor::new(
            "pagination",
            PaginationConfig {
                db_type: Some(DbType::Mysql),
                max_limit: Some(50),
                ..PaginationConfig::default()
            },
        );
        let executor = CountingExecutor::new("", 1000);
        let mut ctx =
            RequestContext::new().with_page(PageRequest::new(2, 500).without_count());
        let mut bound = BoundSql::new("SELECT * FROM users");

        assert!(stage.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());
        assert!(executor.seen.lock().unwrap().is_empty());

        stage
            .before_query(&executor, &ms(), &mut bound, &mut ctx)
            .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM users LIMIT ?,?");
        assert_eq!(bound.parameters, vec![json!(50), json!(50)]);
    }

    #[test]
    fn test_no_page_request_passes_through() {
        let stage = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let executor = CountingExecutor::new("mysql://db/app", 5);
        let mut ctx = RequestContext::new();
        let mut bound = BoundSql::new("SELECT 1");

        assert!(stage.will_query(&executor, &ms(), &bound, &mut ctx).unwrap());
        stage
            .before_query(&executor, &ms(), &mut bound, &mut ctx)
            .unwrap();
        assert_eq!(bound.sql, "SELECT 1");
    }

    #[test]
    fn test_unknown_database_fails_loudly() {
        let stage = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let executor = CountingExecutor::new("unknown://x", 5);
        let mut ctx = RequestContext::new().with_page(PageRequest::new(1, 10).without_count());
        let mut bound = BoundSql::new("SELECT 1");

        let result = stage.before_query(&executor, &ms(), &mut bound, &mut ctx);
        assert!(matches!(result, Err(RewriteError::UnsupportedDialect { .. })));
    }

    #[test]
    fn test_already_bounded_statement_fails_loudly() {
        let stage = PaginationInterceptor::new("pagination", PaginationConfig::default());
        let executor = CountingExecutor::new("mysql://db/app", 100);
        let mut ctx = RequestContext::new().with_page(PageRequest::new(3, 10).without_count());
        let mut bound = BoundSql::new("SELECT * FROM users LIMIT 5");

        let result = stage.before_query(&executor, &ms(), &mut bound, &mut ctx);
        assert!(matches!(result, Err(RewriteError::UnsupportedShape { .. })));
        assert_eq!(bound.sql, "SELECT * FROM users LIMIT 5");
    }
}
