//! Per-call statement state: the bound SQL, the statement descriptor and the
//! request-scoped context. All of it is built fresh for each call.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::parser::StatementKind;

/// SQL text plus its positional parameters, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub parameters: Vec<Value>,
    rewritten_by: BTreeSet<String>,
}

impl BoundSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
            rewritten_by: BTreeSet::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Record that `stage` rewrote this statement. Returns `false` if it
    /// already had.
    pub fn mark_rewritten(&mut self, stage: &str) -> bool {
        self.rewritten_by.insert(stage.to_string())
    }

    pub fn is_rewritten_by(&self, stage: &str) -> bool {
        self.rewritten_by.contains(stage)
    }

    /// Number of `?` placeholders outside string literals and quoted
    /// identifiers.
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }
}

/// Describes the statement being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedStatement {
    pub id: String,
    pub kind: StatementKind,
    /// Entity the statement operates on, when known.
    pub entity: Option<String>,
}

impl MappedStatement {
    pub fn new(id: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            id: id.into(),
            kind,
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

/// A page request. `current` is 1-based; a `size` of 0 disables paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub current: u64,
    pub size: u64,
    /// Run a count query before fetching the page.
    pub search_count: bool,
    /// Per-request cap on `size`; overrides the stage's `max_limit`.
    pub max_limit: Option<u64>,
    /// Filled by the pagination stage when `search_count` is set.
    pub total: Option<u64>,
}

impl PageRequest {
    pub fn new(current: u64, size: u64) -> Self {
        Self {
            current: current.max(1),
            size,
            search_count: true,
            max_limit: None,
            total: None,
        }
    }

    pub fn without_count(mut self) -> Self {
        self.search_count = false;
        self
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }

    pub fn offset(&self) -> u64 {
        self.current.saturating_sub(1).saturating_mul(self.size)
    }

    /// Number of pages given the known total, or `None` before counting.
    pub fn pages(&self) -> Option<u64> {
        match (self.total, self.size) {
            (_, 0) => Some(1),
            (Some(total), size) => Some(total.div_ceil(size)),
            (None, _) => None,
        }
    }
}

/// Request-scoped attributes (current tenant, table suffix, ...) and the
/// optional page request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    attributes: Map<String, Value>,
    page: Option<PageRequest>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = Some(page);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn page(&self) -> Option<&PageRequest> {
        self.page.as_ref()
    }

    pub fn page_mut(&mut self) -> Option<&mut PageRequest> {
        self.page.as_mut()
    }
}

/// Count `?` placeholders, skipping quoted text and comments.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                // Doubled quotes inside a literal re-enter this arm and
                // are skipped the same way.
                for inner in chars.by_ref() {
                    if inner == ch {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '?' => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"), 2);
        assert_eq!(count_placeholders("SELECT '?' FROM t WHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT \"a?\" FROM t -- what?\nWHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT 'it''s?' FROM t"), 0);
    }

    #[test]
    fn test_page_offsets() {
        let page = PageRequest::new(3, 10);
        assert_eq!(page.offset(), 20);
        assert_eq!(PageRequest::new(0, 10).offset(), 0);

        let mut page = PageRequest::new(1, 10);
        assert_eq!(page.pages(), None);
        page.total = Some(21);
        assert_eq!(page.pages(), Some(3));
    }

    #[test]
    fn test_mark_rewritten_once() {
        let mut bound = BoundSql::new("SELECT 1").with_parameters(vec![json!(1)]);
        assert!(bound.mark_rewritten("tenant-line"));
        assert!(!bound.mark_rewritten("tenant-line"));
        assert!(bound.is_rewritten_by("tenant-line"));
        assert!(!bound.is_rewritten_by("pagination"));
    }

    #[test]
    fn test_request_attributes() {
        let ctx = RequestContext::new()
            .with_attribute("tenant_id", 7)
            .with_page(PageRequest::new(2, 5));
        assert_eq!(ctx.attribute("tenant_id"), Some(&json!(7)));
        assert_eq!(ctx.page().map(PageRequest::offset), Some(5));
    }
}
