//! Count query derivation.

use sqlparser::ast::{GroupByExpr, Query, SelectItem, SetExpr, Statement};

use crate::context::count_placeholders;
use crate::error::RewriteError;
use crate::parser::StatementClassifier;

const COUNT_SELECT: &str = "SELECT COUNT(*) AS total";

/// Derive the total-row count query for a SELECT.
///
/// With `optimize` set, simple queries keep their FROM and WHERE and have
/// their projection replaced by `COUNT(*)`. Queries whose row count depends
/// on the projection or on aggregation (DISTINCT, GROUP BY, HAVING, set
/// operations, LIMIT/FETCH) are wrapped as a subselect instead, as are
/// queries with placeholders in the projection, since dropping those would
/// shift the remaining parameters.
///
/// ORDER BY is dropped unless it holds placeholders. The derived query always
/// binds the same parameters as the original.
pub fn count_sql(
    classifier: &StatementClassifier,
    sql: &str,
    optimize: bool,
) -> Result<String, RewriteError> {
    let parsed = classifier.parse_single(sql)?;
    let Statement::Query(mut query) = parsed.into_statement() else {
        return Err(RewriteError::unsupported("count query requires a SELECT"));
    };

    let bounded = query.limit_clause.is_some() || query.fetch.is_some();
    if !bounded && !order_by_has_placeholders(&query) {
        query.order_by = None;
    }

    if optimize && can_replace_projection(&query) {
        let projection = count_projection(classifier)?;
        if let SetExpr::Select(select) = query.body.as_mut() {
            select.projection = projection;
        }
        return Ok(query.to_string());
    }

    Ok(format!("{COUNT_SELECT} FROM ({query}) TOTAL"))
}

fn order_by_has_placeholders(query: &Query) -> bool {
    query
        .order_by
        .as_ref()
        .is_some_and(|order_by| count_placeholders(&order_by.to_string()) > 0)
}

fn can_replace_projection(query: &Query) -> bool {
    if query.limit_clause.is_some() || query.fetch.is_some() {
        return false;
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return false;
    };
    let grouped = match &select.group_by {
        GroupByExpr::All(_) => true,
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
    };
    let projection_params = select
        .projection
        .iter()
        .any(|item| count_placeholders(&item.to_string()) > 0);

    select.distinct.is_none() && !grouped && select.having.is_none() && !projection_params
}

fn count_projection(classifier: &StatementClassifier) -> Result<Vec<SelectItem>, RewriteError> {
    let parsed = classifier.parse_single(COUNT_SELECT)?;
    if let Statement::Query(query) = parsed.statement() {
        if let SetExpr::Select(select) = query.body.as_ref() {
            return Ok(select.projection.clone());
        }
    }
    Err(RewriteError::parse(COUNT_SELECT, "count projection did not parse as a SELECT"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpose_core::DbType;
    use pretty_assertions::assert_eq;

    fn count(sql: &str) -> String {
        count_sql(&StatementClassifier::new(DbType::Mysql), sql, true).unwrap()
    }

    #[test]
    fn test_replaces_projection_and_drops_order_by() {
        assert_eq!(
            count("SELECT id, name FROM users WHERE age > ? ORDER BY name"),
            "SELECT COUNT(*) AS total FROM users WHERE age > ?"
        );
    }

    #[test]
    fn test_group_by_wraps() {
        assert_eq!(
            count("SELECT status, COUNT(*) FROM orders GROUP BY status"),
            "SELECT COUNT(*) AS total FROM (SELECT status, COUNT(*) FROM orders GROUP BY status) TOTAL"
        );
    }

    #[test]
    fn test_distinct_and_union_wrap() {
        assert_eq!(
            count("SELECT DISTINCT city FROM users"),
            "SELECT COUNT(*) AS total FROM (SELECT DISTINCT city FROM users) TOTAL"
        );
        assert_eq!(
            count("SELECT a FROM t1 UNION SELECT a FROM t2 ORDER BY a"),
            "SELECT COUNT(*) AS total FROM (SELECT a FROM t1 UNION SELECT a FROM t2) TOTAL"
        );
    }

    #[test]
    fn test_projection_placeholders_wrap() {
        let sql = "SELECT id, ? AS tag FROM users WHERE age > ?";
        let counted = count(sql);
        assert_eq!(counted, format!("SELECT COUNT(*) AS total FROM ({sql}) TOTAL"));
        assert_eq!(count_placeholders(&counted), 2);
    }

    #[test]
    fn test_order_by_placeholders_kept() {
        let counted = count("SELECT id FROM users ORDER BY FIELD(id, ?)");
        assert_eq!(counted, "SELECT COUNT(*) AS total FROM users ORDER BY FIELD(id, ?)");
    }

    #[test]
    fn test_unoptimized_always_wraps() {
        let counted =
            count_sql(&StatementClassifier::default(), "SELECT * FROM users", false).unwrap();
        assert_eq!(counted, "SELECT COUNT(*) AS total FROM (SELECT * FROM users) TOTAL");
    }

    #[test]
    fn test_rejects_non_select() {
        let result = count_sql(&StatementClassifier::default(), "DELETE FROM users", true);
        assert!(matches!(result, Err(RewriteError::UnsupportedShape { .. })));
    }
}
