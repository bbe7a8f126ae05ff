use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use minijinja::value::Object;
use minijinja::{Error, ErrorKind, State, Value};

use super::lookup::LookupRecord;
use super::{is_template_global, lock};
use crate::bindings::BindingSet;
use crate::catalog::BindingRegistry;
use crate::config::ResolutionConfig;
use crate::error::{Result, SqlBindError};
use crate::subject::Subject;

/// A column reference rendered during generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Logical source name as written in the template.
    pub source: String,
    /// Logical column (binding item) id.
    pub item: String,
    /// Physical binding set the source resolved to.
    pub binding_set: String,
    /// SQL text the reference rendered as.
    pub sql: String,
}

/// Final state of one resolution record.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub name: String,
    pub alias: Option<String>,
    pub binding_set: Arc<BindingSet>,
    pub selected: Vec<String>,
    pub all: Vec<String>,
}

#[derive(Debug, Default)]
struct RecordState {
    table_rendered: bool,
    selected: Vec<String>,
    all: Vec<String>,
}

#[derive(Debug)]
struct ResolutionRecord {
    name: String,
    binding_set: Arc<BindingSet>,
    alias: Option<String>,
    state: Mutex<RecordState>,
}

impl ResolutionRecord {
    /// Prefix for qualified columns: the alias, or the table in plain form.
    fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.binding_set.table)
    }

    fn table_reference(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} {alias}", self.binding_set.table),
            None => self.binding_set.table.clone(),
        }
    }

    fn mark_table_rendered(&self) {
        lock(&self.state).table_rendered = true;
    }
}

#[derive(Debug, Default)]
struct GenerationState {
    records: BTreeMap<String, Arc<ResolutionRecord>>,
    order: Vec<String>,
    /// Plain-form sources take no number.
    aliased: usize,
    selected: Vec<ResolvedColumn>,
    all: Vec<ResolvedColumn>,
    failure: Option<SqlBindError>,
}

pub(crate) struct GenerationOutcome {
    pub sources: Vec<ResolvedSource>,
    pub selected: Vec<ResolvedColumn>,
    pub all: Vec<ResolvedColumn>,
    pub failure: Option<SqlBindError>,
}

struct GenerationShared {
    registry: Arc<dyn BindingRegistry>,
    subject: Arc<dyn Subject>,
    lookups: BTreeMap<String, LookupRecord>,
    variables: BTreeMap<String, Value>,
    alias_prefix: String,
    unqualified_marker: char,
    state: Mutex<GenerationState>,
}

impl fmt::Debug for GenerationShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationShared")
            .field("lookups", &self.lookups)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("alias_prefix", &self.alias_prefix)
            .finish_non_exhaustive()
    }
}

impl GenerationShared {
    /// Keep the first failure; later ones are consequences of it.
    fn fail(&self, err: SqlBindError) {
        let mut state = lock(&self.state);
        if state.failure.is_none() {
            state.failure = Some(err);
        }
    }

    fn resolve(&self, name: &str) -> Result<Arc<ResolutionRecord>> {
        let mut state = lock(&self.state);
        if let Some(record) = state.records.get(name) {
            return Ok(record.clone());
        }

        let lookup = self.lookups.get(name);
        let mut required = lookup.map(|l| l.columns.clone()).unwrap_or_default();
        if let Some(filters) = self.registry.subject_filters(name) {
            filters.enrich_required_columns(
                &mut required,
                self.subject.as_ref(),
                self.registry.subject_filter_types(),
            )?;
        }
        let binding_set = self.registry.resolve(name, &required)?;

        let plain_table = lookup.map(|l| l.plain_table).unwrap_or(false);
        let alias = if plain_table {
            None
        } else {
            state.aliased += 1;
            Some(format!("{}{}", self.alias_prefix, state.aliased))
        };
        tracing::debug!(
            source = %name,
            binding_set = %binding_set.name,
            alias = ?alias,
            columns = required.len(),
            "resolved logical source"
        );

        let record = Arc::new(ResolutionRecord {
            name: name.to_string(),
            binding_set,
            alias,
            state: Mutex::new(RecordState::default()),
        });
        state.records.insert(name.to_string(), record.clone());
        state.order.push(name.to_string());
        Ok(record)
    }

    fn check_read(&self, record: &ResolutionRecord, item_id: &str) -> Result<()> {
        let set = &record.binding_set;
        if let Some(item) = set.item(item_id) {
            if let Some(permission) = &item.read_permission {
                if !self.subject.is_permitted(permission) {
                    return Err(SqlBindError::read_denied(&format!("{}.{item_id}", set.name)));
                }
            }
        }
        if let Some(permission) = &set.read_permission {
            if !self.subject.is_permitted(permission) {
                return Err(SqlBindError::read_denied(&set.name));
            }
        }
        Ok(())
    }

    fn column(&self, record: &ResolutionRecord, reference: &str) -> Result<String> {
        let unqualified = reference.ends_with(self.unqualified_marker);
        let id = reference.trim_end_matches(self.unqualified_marker);
        let item = record
            .binding_set
            .item(id)
            .ok_or_else(|| SqlBindError::ColumnNotFound {
                name: record.name.clone(),
                columns: vec![id.to_string()],
            })?;
        self.check_read(record, id)?;

        let sql = if unqualified || !item.is_plain_column() {
            item.column.clone()
        } else {
            format!("{}.{}", record.qualifier(), item.column)
        };

        let (selected, first_use) = {
            let mut record_state = lock(&record.state);
            let selected = !record_state.table_rendered;
            if selected {
                record_state.selected.push(id.to_string());
            }
            let first_use = !record_state.all.iter().any(|seen| seen == id);
            if first_use {
                record_state.all.push(id.to_string());
            }
            (selected, first_use)
        };

        let column = ResolvedColumn {
            source: record.name.clone(),
            item: id.to_string(),
            binding_set: record.binding_set.name.clone(),
            sql: sql.clone(),
        };
        let mut state = lock(&self.state);
        if selected {
            state.selected.push(column.clone());
        }
        if first_use {
            state.all.push(column);
        }
        Ok(sql)
    }
}

/// Root context of the generation pass.
#[derive(Debug, Clone)]
pub(crate) struct GenerationContext {
    shared: Arc<GenerationShared>,
}

impl GenerationContext {
    pub fn new(
        registry: Arc<dyn BindingRegistry>,
        subject: Arc<dyn Subject>,
        lookups: BTreeMap<String, LookupRecord>,
        variables: BTreeMap<String, Value>,
        config: &ResolutionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(GenerationShared {
                registry,
                subject,
                lookups,
                variables,
                alias_prefix: config.alias_prefix.clone(),
                unqualified_marker: config.unqualified_marker,
                state: Mutex::new(GenerationState::default()),
            }),
        }
    }

    pub fn finish(self) -> GenerationOutcome {
        let state = std::mem::take(&mut *lock(&self.shared.state));
        let sources = state
            .order
            .iter()
            .filter_map(|name| state.records.get(name))
            .map(|record| {
                let record_state = lock(&record.state);
                ResolvedSource {
                    name: record.name.clone(),
                    alias: record.alias.clone(),
                    binding_set: record.binding_set.clone(),
                    selected: record_state.selected.clone(),
                    all: record_state.all.clone(),
                }
            })
            .collect();
        GenerationOutcome {
            sources,
            selected: state.selected,
            all: state.all,
            failure: state.failure,
        }
    }
}

impl Object for GenerationContext {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        if let Some(value) = self.shared.variables.get(name) {
            return Some(value.clone());
        }
        if is_template_global(name) {
            return None;
        }
        match self.shared.resolve(name) {
            Ok(record) => Some(Value::from_object(SourceHandle {
                shared: self.shared.clone(),
                record,
            })),
            Err(err) => {
                self.shared.fail(err);
                None
            }
        }
    }
}

/// One resolved logical source as seen by the template.
#[derive(Debug)]
struct SourceHandle {
    shared: Arc<GenerationShared>,
    record: Arc<ResolutionRecord>,
}

impl Object for SourceHandle {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let reference = key.as_str()?;
        match self.shared.column(&self.record, reference) {
            Ok(sql) => Some(Value::from(sql)),
            Err(err) => {
                self.shared.fail(err);
                None
            }
        }
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        _args: &[Value],
    ) -> std::result::Result<Value, Error> {
        match method {
            "plain_table" => {
                self.record.mark_table_rendered();
                Ok(Value::from(self.record.binding_set.table.clone()))
            }
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown method {method}"),
            )),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.record.mark_table_rendered();
        f.write_str(&self.record.table_reference())
    }
}
