//! Row-level security predicates attached to binding sets.
//!
//! Configuration accepts either a list of nodes (combined with AND) or a single
//! connective:
//!
//! ```yaml
//! subject_filters:
//!   or:
//!     - filter: geo
//!     - and:
//!         - filter: channel
//!         - filter: brand
//! ```
//!
//! A node is `{ filter: <type> }` (or just the type name), `{ and: [...] }` or
//! `{ or: [...] }`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::bindings::SubjectFilterType;
use crate::error::{Result, SqlBindError};
use crate::subject::{Subject, WILDCARD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    pub filter_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connective {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl Connective {
    pub fn children(&self) -> &[FilterNode] {
        match self {
            Connective::And(children) | Connective::Or(children) => children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterNode {
    Connective(Connective),
    Filter(SubjectFilter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilters {
    root: Connective,
}

impl SubjectFilters {
    pub fn new(root: Connective) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Connective {
        &self.root
    }

    /// Build the tree from a configuration fragment.
    pub fn parse(config: &Value) -> Result<Self> {
        let root = match config {
            Value::Array(items) => Connective::And(parse_nodes(items)?),
            other => match parse_node(other)? {
                FilterNode::Connective(connective) => connective,
                filter @ FilterNode::Filter(_) => Connective::And(vec![filter]),
            },
        };
        Ok(Self { root })
    }

    /// Leaves in depth-first order.
    pub fn filters(&self) -> Vec<&SubjectFilter> {
        let mut out = Vec::new();
        collect_filters(self.root.children(), &mut out);
        out
    }

    /// Add the backing column of every filter type the subject is restricted on.
    ///
    /// Must run once the surrounding query's columns are known, since the result
    /// feeds binding set group resolution.
    pub fn enrich_required_columns(
        &self,
        target: &mut BTreeSet<String>,
        subject: &dyn Subject,
        types: &BTreeMap<String, SubjectFilterType>,
    ) -> Result<()> {
        for filter in self.filters() {
            let filter_type = types.get(&filter.filter_type).ok_or_else(|| {
                SqlBindError::Validation(format!(
                    "unknown subject filter type {}",
                    filter.filter_type
                ))
            })?;
            if has_wildcard_grant(subject, filter_type) {
                tracing::trace!(filter_type = %filter_type.name, "subject holds wildcard grant");
                continue;
            }
            target.insert(filter_type.item.clone());
        }
        Ok(())
    }

    fn to_config(&self) -> Value {
        connective_to_value(&self.root)
    }
}

/// Whether the subject may see every value of the filter type.
pub fn has_wildcard_grant(subject: &dyn Subject, filter_type: &SubjectFilterType) -> bool {
    subject.session_attribute(filter_type.session_attribute()).as_deref() == Some(WILDCARD)
        || subject.is_permitted(&filter_type.wildcard_permission())
}

fn parse_nodes(items: &[Value]) -> Result<Vec<FilterNode>> {
    items.iter().map(parse_node).collect()
}

fn parse_node(value: &Value) -> Result<FilterNode> {
    match value {
        Value::String(name) => Ok(leaf(name)),
        Value::Object(map) if map.len() == 1 => {
            let (key, inner) = map
                .iter()
                .next()
                .ok_or_else(|| SqlBindError::Validation("empty subject filter node".to_string()))?;
            match (key.as_str(), inner) {
                ("filter", Value::String(name)) => Ok(leaf(name)),
                ("and", Value::Array(items)) => {
                    Ok(FilterNode::Connective(Connective::And(parse_nodes(items)?)))
                }
                ("or", Value::Array(items)) => {
                    Ok(FilterNode::Connective(Connective::Or(parse_nodes(items)?)))
                }
                _ => Err(SqlBindError::Validation(format!(
                    "invalid subject filter node {value}"
                ))),
            }
        }
        other => Err(SqlBindError::Validation(format!(
            "invalid subject filter node {other}"
        ))),
    }
}

fn leaf(name: &str) -> FilterNode {
    FilterNode::Filter(SubjectFilter {
        filter_type: name.to_string(),
    })
}

fn collect_filters<'a>(nodes: &'a [FilterNode], out: &mut Vec<&'a SubjectFilter>) {
    for node in nodes {
        match node {
            FilterNode::Filter(filter) => out.push(filter),
            FilterNode::Connective(connective) => collect_filters(connective.children(), out),
        }
    }
}

fn connective_to_value(connective: &Connective) -> Value {
    let children: Vec<Value> = connective.children().iter().map(node_to_value).collect();
    match connective {
        Connective::And(_) => json!({ "and": children }),
        Connective::Or(_) => json!({ "or": children }),
    }
}

fn node_to_value(node: &FilterNode) -> Value {
    match node {
        FilterNode::Filter(filter) => json!({ "filter": filter.filter_type }),
        FilterNode::Connective(connective) => connective_to_value(connective),
    }
}

impl Serialize for SubjectFilters {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_config().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubjectFilters {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        SubjectFilters::parse(&value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::StaticSubject;

    fn filter_types() -> BTreeMap<String, SubjectFilterType> {
        ["geo", "channel", "brand"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    SubjectFilterType {
                        name: name.to_string(),
                        item: format!("{name}_code"),
                        session_attribute: None,
                        description: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn single_connective_becomes_root() {
        let filters = SubjectFilters::parse(&json!({
            "or": [{ "filter": "geo" }, { "filter": "channel" }]
        }))
        .unwrap();
        assert!(matches!(filters.root(), Connective::Or(children) if children.len() == 2));
    }

    #[test]
    fn top_level_list_gets_default_and_root() {
        let filters = SubjectFilters::parse(&json!([
            { "filter": "geo" },
            { "or": ["channel", { "filter": "brand" }] }
        ]))
        .unwrap();
        assert!(matches!(filters.root(), Connective::And(children) if children.len() == 2));
        let names: Vec<_> = filters
            .filters()
            .into_iter()
            .map(|f| f.filter_type.as_str())
            .collect();
        assert_eq!(names, vec!["geo", "channel", "brand"]);
    }

    #[test]
    fn single_leaf_is_wrapped_in_and() {
        let filters = SubjectFilters::parse(&json!({ "filter": "geo" })).unwrap();
        assert_eq!(
            filters.root(),
            &Connective::And(vec![FilterNode::Filter(SubjectFilter {
                filter_type: "geo".to_string()
            })])
        );
    }

    #[test]
    fn rejects_unknown_node_shape() {
        let err = SubjectFilters::parse(&json!({ "xor": [] })).unwrap_err();
        assert!(matches!(err, SqlBindError::Validation(_)));
    }

    #[test]
    fn yaml_round_trip_keeps_structure() {
        let filters: SubjectFilters =
            serde_yaml::from_str("or:\n  - filter: geo\n  - and: [channel, brand]\n").unwrap();
        let yaml = serde_yaml::to_string(&filters).unwrap();
        let again: SubjectFilters = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(filters, again);
    }

    #[test]
    fn restricted_subject_adds_backing_columns() {
        let filters = SubjectFilters::parse(&json!(["geo", "channel"])).unwrap();
        let mut columns = BTreeSet::from(["revenue".to_string()]);
        filters
            .enrich_required_columns(&mut columns, &StaticSubject::new(), &filter_types())
            .unwrap();
        assert!(columns.contains("geo_code"));
        assert!(columns.contains("channel_code"));
        assert!(columns.contains("revenue"));
    }

    #[test]
    fn wildcard_permission_skips_column() {
        let filters = SubjectFilters::parse(&json!(["geo", "channel"])).unwrap();
        let subject = StaticSubject::new().with_permission("geo:*");
        let mut columns = BTreeSet::new();
        filters
            .enrich_required_columns(&mut columns, &subject, &filter_types())
            .unwrap();
        assert_eq!(columns, BTreeSet::from(["channel_code".to_string()]));
    }

    #[test]
    fn wildcard_session_attribute_skips_column() {
        let filters = SubjectFilters::parse(&json!({ "filter": "geo" })).unwrap();
        let subject = StaticSubject::new().with_session_attribute("geo", "*");
        let mut columns = BTreeSet::new();
        filters
            .enrich_required_columns(&mut columns, &subject, &filter_types())
            .unwrap();
        assert!(columns.is_empty());
    }

    #[test]
    fn unknown_filter_type_fails() {
        let filters = SubjectFilters::parse(&json!({ "filter": "region" })).unwrap();
        let err = filters
            .enrich_required_columns(&mut BTreeSet::new(), &StaticSubject::new(), &filter_types())
            .unwrap_err();
        assert!(matches!(err, SqlBindError::Validation(_)));
    }
}
