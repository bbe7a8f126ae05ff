use std::collections::{BTreeMap, BTreeSet};

use serde::{de, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql_ast::is_identifier;
use crate::subject_filters::SubjectFilters;

/// A logical source mapped onto one physical table or view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSet {
    pub name: String,
    pub table: String,
    /// Permission the current subject needs to read any item of this set.
    #[serde(default)]
    pub read_permission: Option<String>,
    #[serde(default)]
    pub items: BTreeMap<String, BindingItem>,
    #[serde(default)]
    pub subject_filters: Option<SubjectFilters>,
    pub description: Option<String>,
}

impl BindingSet {
    pub fn item(&self, id: &str) -> Option<&BindingItem> {
        self.items.get(id)
    }

    /// Required logical columns this set does not expose, in name order.
    pub fn missing_items<'a>(&self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .iter()
            .filter(|id| !self.items.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.iter().all(|id| self.items.contains_key(id))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingItem {
    /// Physical column name or SQL expression.
    pub column: String,
    pub data_type: Option<String>,
    pub caption: Option<String>,
    pub read_permission: Option<String>,
    pub description: Option<String>,
}

impl BindingItem {
    pub fn column(column: impl Into<String>) -> Self {
        BindingItem {
            column: column.into(),
            data_type: None,
            caption: None,
            read_permission: None,
            description: None,
        }
    }

    /// True when the physical column is a bare identifier that may be prefixed with a table alias.
    pub fn is_plain_column(&self) -> bool {
        is_identifier(&self.column)
    }
}

impl<'de> Deserialize<'de> for BindingItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(BindingItem::column(s)),
            other => {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct Full {
                    column: String,
                    data_type: Option<String>,
                    caption: Option<String>,
                    read_permission: Option<String>,
                    description: Option<String>,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                Ok(BindingItem {
                    column: full.column,
                    data_type: full.data_type,
                    caption: full.caption,
                    read_permission: full.read_permission,
                    description: full.description,
                })
            }
        }
    }
}

/// Several physical mappings published under one logical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSetGroup {
    pub name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub subject_filters: Option<SubjectFilters>,
    pub description: Option<String>,
}

/// A named row-level restriction backed by one logical column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectFilterType {
    pub name: String,
    /// Logical column that must be present to enforce the restriction.
    pub item: String,
    #[serde(default)]
    pub session_attribute: Option<String>,
    pub description: Option<String>,
}

impl SubjectFilterType {
    pub fn session_attribute(&self) -> &str {
        self.session_attribute.as_deref().unwrap_or(&self.name)
    }

    pub fn wildcard_permission(&self) -> String {
        format!("{}:*", self.name)
    }
}
