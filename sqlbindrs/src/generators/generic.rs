use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::bindings::BindingSet;
use crate::engine::{RenderedSql, SqlEngine};
use crate::error::{Result, SqlBindError};
use crate::subject::Subject;

/// One column of the result set, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    /// Logical column id.
    pub name: String,
    /// 1-based display position.
    pub position: usize,
    /// Logical source the column was referenced through.
    pub source: String,
    pub binding_set: String,
}

/// Executable statement with positional bind values.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub binding_set: Option<Arc<BindingSet>>,
}

#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub columns: Vec<ColumnMeta>,
    pub resolved: Vec<Arc<BindingSet>>,
    pub statement: SqlStatement,
}

/// Template in, column metadata and statement out.
pub struct SqlTemplateGenerator<'e> {
    engine: &'e SqlEngine,
}

impl<'e> SqlTemplateGenerator<'e> {
    pub fn new(engine: &'e SqlEngine) -> Self {
        Self { engine }
    }

    pub fn generate(
        &self,
        template: &str,
        params: Vec<serde_json::Value>,
        subject: Arc<dyn Subject>,
    ) -> Result<GeneratedSql> {
        self.generate_with_variables(template, params, subject, None)
    }

    pub fn generate_with_variables(
        &self,
        template: &str,
        params: Vec<serde_json::Value>,
        subject: Arc<dyn Subject>,
        variables: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> Result<GeneratedSql> {
        let rendered = self
            .engine
            .transform(template, subject.clone(), variables)?;
        let resolved = rendered.resolved_binding_sets();

        for set in &resolved {
            if let Some(permission) = &set.read_permission {
                if !subject.is_permitted(permission) {
                    tracing::debug!(binding_set = %set.name, permission = %permission, "read denied");
                    return Err(SqlBindError::read_denied(&set.name));
                }
            }
        }

        let columns = display_columns(&rendered);
        tracing::debug!(
            columns = columns.len(),
            binding_sets = resolved.len(),
            params = params.len(),
            "generated statement"
        );
        Ok(GeneratedSql {
            columns,
            statement: SqlStatement {
                sql: rendered.sql,
                params,
                binding_set: resolved.first().cloned(),
            },
            resolved,
        })
    }
}

fn display_columns(rendered: &RenderedSql) -> Vec<ColumnMeta> {
    rendered
        .selected_columns
        .iter()
        .enumerate()
        .map(|(index, column)| ColumnMeta {
            name: column.item.clone(),
            position: index + 1,
            source: column.source.clone(),
            binding_set: column.binding_set.clone(),
        })
        .collect()
}
