use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use minijinja::value::Object;
use minijinja::Value;

use super::{lock, TOLERANT_ENV};
use crate::error::{Result, SqlBindError};

#[derive(Debug)]
struct ParamState {
    multiplicities: Option<HashMap<String, usize>>,
    placeholder: String,
    separator: String,
    requested: Mutex<Vec<String>>,
}

/// Object bound under the parameter keyword.
#[derive(Debug, Clone)]
struct ParamPlaceholders {
    state: Arc<ParamState>,
}

impl Object for ParamPlaceholders {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        let state = &self.state;
        let count = match &state.multiplicities {
            None => 1,
            Some(multiplicities) => match multiplicities.get(name) {
                Some(count) => *count,
                // Names outside the map are dropped from text and result.
                None => return Some(Value::from("")),
            },
        };
        lock(&state.requested).push(name.to_string());
        let rendered = vec![state.placeholder.as_str(); count].join(&state.separator);
        Some(Value::from(rendered))
    }
}

/// Root context exposing only the keyword.
#[derive(Debug)]
struct ParamContext {
    keyword: String,
    placeholders: ParamPlaceholders,
}

impl Object for ParamContext {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        (key.as_str()? == self.keyword).then(|| Value::from_object(self.placeholders.clone()))
    }
}

pub(crate) fn substitute(
    template: &str,
    multiplicities: Option<&HashMap<String, usize>>,
    keyword: &str,
    separator: &str,
    placeholder: &str,
) -> Result<(String, Vec<String>)> {
    let placeholders = ParamPlaceholders {
        state: Arc::new(ParamState {
            multiplicities: multiplicities.cloned(),
            placeholder: placeholder.to_string(),
            separator: separator.to_string(),
            requested: Mutex::new(Vec::new()),
        }),
    };
    let context = ParamContext {
        keyword: keyword.to_string(),
        placeholders: placeholders.clone(),
    };
    let sql = TOLERANT_ENV
        .render_str(template, Value::from_object(context))
        .map_err(|e| SqlBindError::TemplateSyntax(e.to_string()))?;
    let requested = std::mem::take(&mut *lock(&placeholders.state.requested));
    tracing::trace!(sql = %sql, params = requested.len(), "substituted bind parameters");
    Ok((sql, requested))
}
