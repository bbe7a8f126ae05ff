use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::glob;
use serde::de::DeserializeOwned;

use crate::bindings::{BindingSet, BindingSetGroup, SubjectFilterType};
use crate::error::{Result, SqlBindError};
use crate::subject_filters::SubjectFilters;

/// Name-keyed lookup of logical sources.
///
/// Resolution needs the full set of logical columns a query uses against the
/// name, because a group only narrows to one physical mapping once that set is
/// known.
pub trait BindingRegistry: Send + Sync {
    fn resolve(&self, name: &str, required: &BTreeSet<String>) -> Result<Arc<BindingSet>>;

    /// Subject filters declared for a logical source name, if any.
    fn subject_filters(&self, name: &str) -> Option<&SubjectFilters>;

    fn subject_filter_types(&self) -> &BTreeMap<String, SubjectFilterType>;
}

#[derive(Debug, Default, Clone)]
pub struct BindingCatalog {
    pub binding_sets: BTreeMap<String, Arc<BindingSet>>,
    pub groups: BTreeMap<String, BindingSetGroup>,
    pub filter_types: BTreeMap<String, SubjectFilterType>,
}

impl BindingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        binding_sets: Vec<BindingSet>,
        groups: Vec<BindingSetGroup>,
        filter_types: Vec<SubjectFilterType>,
    ) -> Self {
        let mut catalog = BindingCatalog::new();
        for set in binding_sets {
            catalog.binding_sets.insert(set.name.clone(), Arc::new(set));
        }
        for group in groups {
            catalog.groups.insert(group.name.clone(), group);
        }
        for filter_type in filter_types {
            catalog
                .filter_types
                .insert(filter_type.name.clone(), filter_type);
        }
        catalog
    }

    /// Load `binding_sets/`, `groups/` and `subject_filter_types/` below `root`.
    ///
    /// Only `binding_sets/` is mandatory.
    pub fn load_from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let sets_dir = root.join("binding_sets");
        if !sets_dir.exists() {
            return Err(SqlBindError::Validation(format!(
                "binding_sets directory not found: {}",
                sets_dir.display()
            )));
        }

        let mut catalog = BindingCatalog::new();
        for set in load_yaml_dir::<BindingSet>(sets_dir)? {
            catalog.binding_sets.insert(set.name.clone(), Arc::new(set));
        }
        for group in load_yaml_dir::<BindingSetGroup>(root.join("groups"))? {
            catalog.groups.insert(group.name.clone(), group);
        }
        for filter_type in load_yaml_dir::<SubjectFilterType>(root.join("subject_filter_types"))? {
            catalog
                .filter_types
                .insert(filter_type.name.clone(), filter_type);
        }
        tracing::debug!(
            binding_sets = catalog.binding_sets.len(),
            groups = catalog.groups.len(),
            filter_types = catalog.filter_types.len(),
            root = %root.display(),
            "loaded binding catalog"
        );
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn get_binding_set(&self, name: &str) -> Option<&Arc<BindingSet>> {
        self.binding_sets.get(name)
    }

    pub fn get_group(&self, name: &str) -> Option<&BindingSetGroup> {
        self.groups.get(name)
    }

    /// Cross-check names, group members and subject filter references.
    pub fn validate(&self) -> Result<()> {
        for group in self.groups.values() {
            if self.binding_sets.contains_key(&group.name) {
                return Err(SqlBindError::Validation(format!(
                    "{} is declared both as binding set and as group",
                    group.name
                )));
            }
            if group.members.is_empty() {
                return Err(SqlBindError::Validation(format!(
                    "group {} has no members",
                    group.name
                )));
            }
            for member in &group.members {
                if !self.binding_sets.contains_key(member) {
                    return Err(SqlBindError::Validation(format!(
                        "group {} references unknown binding set {member}",
                        group.name
                    )));
                }
            }
            if let Some(filters) = &group.subject_filters {
                self.validate_group_filters(filters, group)?;
            }
        }
        for set in self.binding_sets.values() {
            if let Some(filters) = &set.subject_filters {
                self.validate_filters(filters, set)?;
            }
        }
        Ok(())
    }

    fn validate_filters(&self, filters: &SubjectFilters, set: &BindingSet) -> Result<()> {
        for filter in filters.filters() {
            let filter_type = self.filter_type(&filter.filter_type, &set.name)?;
            if set.item(&filter_type.item).is_none() {
                return Err(SqlBindError::Validation(format!(
                    "binding set {} lacks item {} backing subject filter {}",
                    set.name, filter_type.item, filter_type.name
                )));
            }
        }
        Ok(())
    }

    /// Group filters only need one member able to enforce them; enrichment
    /// narrows resolution onto it.
    fn validate_group_filters(
        &self,
        filters: &SubjectFilters,
        group: &BindingSetGroup,
    ) -> Result<()> {
        for filter in filters.filters() {
            let filter_type = self.filter_type(&filter.filter_type, &group.name)?;
            let backed = group
                .members
                .iter()
                .filter_map(|m| self.binding_sets.get(m))
                .any(|set| set.item(&filter_type.item).is_some());
            if !backed {
                return Err(SqlBindError::Validation(format!(
                    "no member of group {} has item {} backing subject filter {}",
                    group.name, filter_type.item, filter_type.name
                )));
            }
        }
        Ok(())
    }

    fn filter_type(&self, name: &str, owner: &str) -> Result<&SubjectFilterType> {
        self.filter_types.get(name).ok_or_else(|| {
            SqlBindError::Validation(format!("{owner} uses unknown subject filter type {name}"))
        })
    }

    fn resolve_group(
        &self,
        group: &BindingSetGroup,
        required: &BTreeSet<String>,
    ) -> Result<Arc<BindingSet>> {
        let members: Vec<&Arc<BindingSet>> = group
            .members
            .iter()
            .filter_map(|m| self.binding_sets.get(m))
            .collect();
        let mut candidates: Vec<&Arc<BindingSet>> = members
            .iter()
            .copied()
            .filter(|set| set.covers(required))
            .collect();

        match candidates.len() {
            1 => Ok(candidates.remove(0).clone()),
            0 => {
                // Report the columns no member knows; if each exists somewhere,
                // only the combination is unavailable.
                let mut unknown: Vec<String> = required
                    .iter()
                    .filter(|id| members.iter().all(|set| set.item(id).is_none()))
                    .cloned()
                    .collect();
                if unknown.is_empty() {
                    unknown = required.iter().cloned().collect();
                }
                Err(SqlBindError::ColumnNotFound {
                    name: group.name.clone(),
                    columns: unknown,
                })
            }
            n => {
                tracing::warn!(
                    group = %group.name,
                    candidates = n,
                    "binding set group resolution is ambiguous"
                );
                Err(SqlBindError::AmbiguousSource {
                    name: group.name.clone(),
                    candidates: n,
                })
            }
        }
    }
}

impl BindingRegistry for BindingCatalog {
    fn resolve(&self, name: &str, required: &BTreeSet<String>) -> Result<Arc<BindingSet>> {
        if let Some(set) = self.binding_sets.get(name) {
            let missing = set.missing_items(required);
            if !missing.is_empty() {
                return Err(SqlBindError::ColumnNotFound {
                    name: name.to_string(),
                    columns: missing.into_iter().map(str::to_string).collect(),
                });
            }
            return Ok(set.clone());
        }
        if let Some(group) = self.groups.get(name) {
            return self.resolve_group(group, required);
        }
        Err(SqlBindError::UnknownSource(name.to_string()))
    }

    fn subject_filters(&self, name: &str) -> Option<&SubjectFilters> {
        if let Some(set) = self.binding_sets.get(name) {
            return set.subject_filters.as_ref();
        }
        self.groups
            .get(name)
            .and_then(|group| group.subject_filters.as_ref())
    }

    fn subject_filter_types(&self) -> &BTreeMap<String, SubjectFilterType> {
        &self.filter_types
    }
}

fn load_yaml_dir<T: DeserializeOwned>(dir: PathBuf) -> Result<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for pattern in ["yml", "yaml"] {
        for entry in glob(&format!("{}/*.{pattern}", dir.display()))
            .map_err(|e| SqlBindError::Other(e.into()))?
            .flatten()
        {
            out.push(load_yaml_file(&entry)?);
        }
    }
    Ok(out)
}

fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}
