//! Column placeholder templates.
//!
//! Hand-written SQL may name an entity's columns symbolically:
//!
//! | Token                      | Expands to                              |
//! |----------------------------|-----------------------------------------|
//! | `{@user}`                  | `id,user_name AS userName`              |
//! | `{@user:u}`                | `u.id,u.user_name AS userName`          |
//! | `{@user:u:owner}`          | `u.id AS "owner.id",u.user_name AS "owner.userName"` |

use interpose_core::{FieldInfo, MetadataLookup, TableInfo};
use regex::{Captures, Regex};
use std::sync::{Arc, LazyLock};

use crate::chain::InnerInterceptor;
use crate::context::{BoundSql, MappedStatement, RequestContext};
use crate::error::RewriteError;

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{@([A-Za-z_][\w$]*)(?::([\w$]*))?(?::([\w$]+))?\}")
        .expect("column template pattern is valid")
});

/// Expands `{@entity[:alias[:asAlias]]}` tokens using entity metadata.
#[derive(Clone)]
pub struct ColumnTemplateResolver {
    metadata: Arc<dyn MetadataLookup>,
}

impl ColumnTemplateResolver {
    pub fn new(metadata: Arc<dyn MetadataLookup>) -> Self {
        Self { metadata }
    }

    /// Whether `sql` contains any template token.
    pub fn has_templates(sql: &str) -> bool {
        TEMPLATE.is_match(sql)
    }

    /// Replace every template token in `sql`.
    pub fn resolve(&self, sql: &str) -> Result<String, RewriteError> {
        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for caps in TEMPLATE.captures_iter(sql) {
            let Some(token) = caps.get(0) else {
                continue;
            };
            out.push_str(&sql[last..token.start()]);
            out.push_str(&self.expand(&caps)?);
            last = token.end();
        }
        out.push_str(&sql[last..]);
        Ok(out)
    }

    fn expand(&self, caps: &Captures<'_>) -> Result<String, RewriteError> {
        let entity = caps.get(1).map_or("", |m| m.as_str());
        let info = self
            .metadata
            .resolve(entity)
            .ok_or_else(|| RewriteError::unresolved(format!("no metadata for entity {entity}")))?;

        let alias = caps.get(2).map(|m| m.as_str()).filter(|a| !a.is_empty());
        let as_alias = caps.get(3).map(|m| m.as_str());
        Ok(select_columns(&info, alias, as_alias))
    }
}

fn select_columns(info: &TableInfo, alias: Option<&str>, as_alias: Option<&str>) -> String {
    if alias.is_none() && as_alias.is_none() {
        return info.select_list();
    }
    info.select_fields()
        .map(|field| qualified_fragment(field, alias, as_alias))
        .collect::<Vec<_>>()
        .join(",")
}

fn qualified_fragment(field: &FieldInfo, alias: Option<&str>, as_alias: Option<&str>) -> String {
    let column = match alias {
        Some(alias) => format!("{alias}.{}", field.column),
        None => field.column.clone(),
    };
    match as_alias {
        Some(prefix) => format!("{column} AS \"{prefix}.{}\"", field.property),
        None if field.column != field.property => format!("{column} AS {}", field.property),
        None => column,
    }
}

/// Pipeline stage expanding column templates before the SQL is bound.
pub struct ColumnTemplateInterceptor {
    name: String,
    resolver: ColumnTemplateResolver,
}

impl ColumnTemplateInterceptor {
    pub fn new(name: impl Into<String>, resolver: ColumnTemplateResolver) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }
}

impl InnerInterceptor for ColumnTemplateInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn before_get_bound_sql(
        &self,
        ms: &MappedStatement,
        bound: &mut BoundSql,
        _ctx: &RequestContext,
    ) -> Result<(), RewriteError> {
        if !ColumnTemplateResolver::has_templates(&bound.sql) {
            return Ok(());
        }
        let resolved = self.resolver.resolve(&bound.sql)?;
        tracing::debug!(statement = %ms.id, sql = %resolved, "Expanded column templates");
        bound.sql = resolved;
        Ok(())
    }
}
