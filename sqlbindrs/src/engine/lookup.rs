use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use minijinja::value::Object;
use minijinja::{Error, ErrorKind, State, Value};

use super::{is_template_global, lock};

/// Logical columns one source needs, collected by the lookup pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct LookupRecord {
    pub columns: BTreeSet<String>,
    /// The text asked for the unaliased table form.
    pub plain_table: bool,
}

#[derive(Debug)]
struct LookupShared {
    unqualified_marker: char,
    records: Mutex<BTreeMap<String, LookupRecord>>,
}

/// Root context of the lookup pass: every top-level name is a logical source.
#[derive(Debug, Clone)]
pub(crate) struct LookupContext {
    shared: Arc<LookupShared>,
}

impl LookupContext {
    pub fn new(unqualified_marker: char) -> Self {
        Self {
            shared: Arc::new(LookupShared {
                unqualified_marker,
                records: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn into_records(self) -> BTreeMap<String, LookupRecord> {
        std::mem::take(&mut *lock(&self.shared.records))
    }
}

impl Object for LookupContext {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        if is_template_global(name) {
            return None;
        }
        lock(&self.shared.records)
            .entry(name.to_string())
            .or_default();
        Some(Value::from_object(LookupHandle {
            name: name.to_string(),
            shared: self.shared.clone(),
        }))
    }
}

/// One logical source as seen by the lookup pass.
#[derive(Debug)]
struct LookupHandle {
    name: String,
    shared: Arc<LookupShared>,
}

impl LookupHandle {
    fn with_record(&self, f: impl FnOnce(&mut LookupRecord)) {
        let mut records = lock(&self.shared.records);
        f(records.entry(self.name.clone()).or_default());
    }
}

impl Object for LookupHandle {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let reference = key.as_str()?;
        // Qualification does not change which mapping is needed.
        let column = reference.trim_end_matches(self.shared.unqualified_marker);
        if !column.is_empty() {
            self.with_record(|record| {
                record.columns.insert(column.to_string());
            });
        }
        Some(Value::from(""))
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        _args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "plain_table" => {
                self.with_record(|record| record.plain_table = true);
                Ok(Value::from(""))
            }
            // `UnknownMethod` would make minijinja retry the name as an attribute.
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown method {method}"),
            )),
        }
    }

    fn render(self: &Arc<Self>, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}
