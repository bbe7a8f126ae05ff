//! Minimal select/union AST that renders to binding template text.
//!
//! Column and table references render as template expressions against logical
//! sources, so the result still goes through [`crate::SqlEngine::transform`].
//! Literal values never appear in the text; they render as placeholders and are
//! collected in render order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, SqlBindError};

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// True for bare SQL/template identifiers.
pub fn is_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Logical column of a logical source.
    Binding {
        source: String,
        item: String,
    },
    Null,
    /// Bound value; renders as a placeholder.
    Param(Value),
    Lower(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Junction {
        op: SqlJunction,
        exprs: Vec<SqlExpr>,
    },
}

impl SqlExpr {
    pub fn binding(source: impl Into<String>, item: impl Into<String>) -> Self {
        SqlExpr::Binding {
            source: source.into(),
            item: item.into(),
        }
    }

    pub fn binary(op: SqlBinaryOperator, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOperator {
    Eq,
    /// `LIKE` with backslash as escape character.
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJunction {
    And,
    Or,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    /// Logical source name; rendered as its aliased table reference.
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub select: Vec<SqlExpr>,
    pub from: TableRef,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
}

/// Template text plus the values for its placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedTemplate {
    pub text: String,
    pub params: Vec<Value>,
}

pub struct SqlRenderer<'a> {
    placeholder: &'a str,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(placeholder: &'a str) -> Self {
        Self { placeholder }
    }

    pub fn render_select(&self, query: &SelectQuery) -> Result<RenderedTemplate> {
        let mut params = Vec::new();
        let text = self.select_text(query, &mut params)?;
        Ok(RenderedTemplate { text, params })
    }

    /// Render branches joined with `UNION ALL`.
    pub fn render_union(&self, queries: &[SelectQuery]) -> Result<RenderedTemplate> {
        if queries.is_empty() {
            return Err(SqlBindError::Validation(
                "cannot render an empty union".to_string(),
            ));
        }
        let mut params = Vec::new();
        let branches = queries
            .iter()
            .map(|query| self.select_text(query, &mut params))
            .collect::<Result<Vec<_>>>()?;
        Ok(RenderedTemplate {
            text: branches.join(" UNION ALL "),
            params,
        })
    }

    fn select_text(&self, query: &SelectQuery, params: &mut Vec<Value>) -> Result<String> {
        let select_items = query
            .select
            .iter()
            .map(|expr| self.render_expr(expr, params))
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_items.join(", "),
            source_ref(&query.from.source)?
        );

        if !query.filters.is_empty() {
            let filters = query
                .filters
                .iter()
                .map(|f| self.render_expr(f, params))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" WHERE {}", filters.join(" AND ")));
        }

        if !query.group_by.is_empty() {
            let groups = query
                .group_by
                .iter()
                .map(|g| self.render_expr(g, params))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        Ok(sql)
    }

    fn render_expr(&self, expr: &SqlExpr, params: &mut Vec<Value>) -> Result<String> {
        Ok(match expr {
            SqlExpr::Binding { source, item } => {
                let source = checked_source(source)?;
                if is_identifier(item) {
                    format!("{{{{ {source}.{item} }}}}")
                } else {
                    format!("{{{{ {source}[{}] }}}}", serde_json::to_string(item)?)
                }
            }
            SqlExpr::Null => "NULL".to_string(),
            SqlExpr::Param(value) => {
                params.push(value.clone());
                self.placeholder.to_string()
            }
            SqlExpr::Lower(inner) => format!("LOWER({})", self.render_expr(inner, params)?),
            SqlExpr::IsNotNull(inner) => format!("{} IS NOT NULL", self.render_expr(inner, params)?),
            SqlExpr::BinaryOp { op, left, right } => {
                let left = self.render_expr(left, params)?;
                let right = self.render_expr(right, params)?;
                match op {
                    SqlBinaryOperator::Eq => format!("({left} = {right})"),
                    SqlBinaryOperator::Like => format!("({left} LIKE {right} ESCAPE '\\')"),
                }
            }
            SqlExpr::Junction { exprs, .. } if exprs.len() == 1 => {
                self.render_expr(&exprs[0], params)?
            }
            SqlExpr::Junction { op, exprs } => {
                let keyword = match op {
                    SqlJunction::And => " AND ",
                    SqlJunction::Or => " OR ",
                };
                let parts = exprs
                    .iter()
                    .map(|e| self.render_expr(e, params))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(keyword))
            }
        })
    }
}

/// `{{ source }}` for a source usable as template variable.
fn source_ref(source: &str) -> Result<String> {
    Ok(format!("{{{{ {} }}}}", checked_source(source)?))
}

fn checked_source(source: &str) -> Result<&str> {
    if is_identifier(source) {
        Ok(source)
    } else {
        Err(SqlBindError::Validation(format!(
            "logical source name {source:?} is not an identifier"
        )))
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
