//! Hierarchical suggest queries.
//!
//! A hierarchy is a chain of levels over one logical source (for example
//! `country <- region <- city`). A search such as `"Germany/Berlin"` is split
//! into one token per level and the builder emits one `SELECT` branch per
//! level that can hold that many tokens, joined with `UNION ALL`. Every branch
//! selects the same global column list so the union lines up, with `NULL` for
//! columns deeper than the branch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::generic::{SqlStatement, SqlTemplateGenerator};
use crate::bindings::BindingSet;
use crate::engine::{is_template_global, SqlEngine};
use crate::error::{Result, SqlBindError};
use crate::sql_ast::{
    escape_like, is_identifier, SelectQuery, SqlBinaryOperator, SqlExpr, SqlJunction, SqlRenderer,
    TableRef,
};
use crate::subject::Subject;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuggestHierarchy {
    /// Logical source (binding set or group) the levels live in.
    pub binding_set: String,
    pub levels: Vec<HierarchyLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchyLevel {
    /// Logical column identifying the level.
    pub id: String,
    /// Logical column shown for the level; defaults to `id`.
    #[serde(default)]
    pub caption: Option<String>,
    /// Parent level id.
    #[serde(default)]
    pub requires: Option<String>,
}

impl HierarchyLevel {
    fn caption_item(&self) -> &str {
        self.caption.as_deref().unwrap_or(&self.id)
    }
}

impl SuggestHierarchy {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Root-first chain of levels for every declared level, in declaration order.
    fn chains(&self) -> Result<Vec<Vec<&HierarchyLevel>>> {
        if !is_identifier(&self.binding_set) || is_template_global(&self.binding_set) {
            return Err(SqlBindError::HierarchyConfig(format!(
                "binding set name {:?} cannot be used as a template source",
                self.binding_set
            )));
        }
        if self.levels.is_empty() {
            return Err(SqlBindError::HierarchyConfig(format!(
                "hierarchy over {} declares no levels",
                self.binding_set
            )));
        }

        let mut by_id: HashMap<&str, &HierarchyLevel> = HashMap::new();
        for level in &self.levels {
            if by_id.insert(level.id.as_str(), level).is_some() {
                return Err(SqlBindError::HierarchyConfig(format!(
                    "level {} is declared twice",
                    level.id
                )));
            }
        }

        self.levels
            .iter()
            .map(|level| {
                let mut chain = vec![level];
                let mut seen = BTreeSet::from([level.id.as_str()]);
                let mut current = level;
                while let Some(parent_id) = &current.requires {
                    let parent = by_id.get(parent_id.as_str()).copied().ok_or_else(|| {
                        SqlBindError::HierarchyConfig(format!(
                            "level {} requires undefined level {parent_id}",
                            current.id
                        ))
                    })?;
                    if !seen.insert(parent.id.as_str()) {
                        return Err(SqlBindError::HierarchyConfig(format!(
                            "level {} is part of a requires cycle",
                            level.id
                        )));
                    }
                    chain.push(parent);
                    current = parent;
                }
                chain.reverse();
                Ok(chain)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuggestRequest {
    pub search: String,
    /// Splits `search` into per-level tokens; falls back to the configured separator.
    pub level_separator: Option<char>,
    /// Add a caption column after every level column and match tokens against captions.
    pub captions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestColumn {
    pub item: String,
    /// 1-based display position.
    pub position: usize,
    /// Level id this column captions, `None` for level id columns.
    pub caption_for: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SuggestQuery {
    pub statement: SqlStatement,
    pub columns: Vec<SuggestColumn>,
    pub resolved: Vec<Arc<BindingSet>>,
}

/// Global column slot: logical item plus the level it captions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot<'h> {
    item: &'h str,
    caption_for: Option<&'h str>,
}

pub struct SuggestQueryBuilder<'e> {
    engine: &'e SqlEngine,
}

impl<'e> SuggestQueryBuilder<'e> {
    pub fn new(engine: &'e SqlEngine) -> Self {
        Self { engine }
    }

    pub fn build(
        &self,
        hierarchy: &SuggestHierarchy,
        request: &SuggestRequest,
        subject: Arc<dyn Subject>,
    ) -> Result<SuggestQuery> {
        let chains = hierarchy.chains()?;
        let slots = global_slots(&chains, request.captions);
        let tokens = self.tokens(request);

        let branches: Vec<SelectQuery> = if tokens.is_empty() {
            chains
                .first()
                .map(|chain| self.branch(hierarchy, chain, &slots, &[], request.captions))
                .into_iter()
                .collect()
        } else {
            chains
                .iter()
                .filter(|chain| {
                    let keep = chain.len() >= tokens.len();
                    if !keep {
                        tracing::trace!(
                            level = %chain[chain.len() - 1].id,
                            depth = chain.len(),
                            tokens = tokens.len(),
                            "skipping suggest level"
                        );
                    }
                    keep
                })
                .map(|chain| self.branch(hierarchy, chain, &slots, &tokens, request.captions))
                .collect()
        };
        if branches.is_empty() {
            return Err(SqlBindError::Validation(format!(
                "search has {} levels but hierarchy over {} is shallower",
                tokens.len(),
                hierarchy.binding_set
            )));
        }
        tracing::debug!(
            binding_set = %hierarchy.binding_set,
            branches = branches.len(),
            tokens = tokens.len(),
            "building suggest query"
        );

        let renderer = SqlRenderer::new(&self.engine.config().params.placeholder);
        let template = renderer.render_union(&branches)?;
        let generated = SqlTemplateGenerator::new(self.engine).generate(
            &template.text,
            template.params,
            subject,
        )?;

        let columns = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| SuggestColumn {
                item: slot.item.to_string(),
                position: index + 1,
                caption_for: slot.caption_for.map(str::to_string),
            })
            .collect();
        Ok(SuggestQuery {
            statement: generated.statement,
            columns,
            resolved: generated.resolved,
        })
    }

    fn tokens(&self, request: &SuggestRequest) -> Vec<String> {
        let separator = request
            .level_separator
            .or(self.engine.config().suggest.level_separator);
        let parts: Vec<&str> = match separator {
            Some(sep) => request.search.split(sep).collect(),
            None => vec![request.search.as_str()],
        };
        parts
            .into_iter()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn branch<'h>(
        &self,
        hierarchy: &'h SuggestHierarchy,
        chain: &[&'h HierarchyLevel],
        slots: &[Slot<'h>],
        tokens: &[String],
        captions: bool,
    ) -> SelectQuery {
        let source = hierarchy.binding_set.as_str();
        let own = global_slots(&[chain.to_vec()], captions);
        let column = |item: &str| SqlExpr::binding(source, item);

        let select = slots
            .iter()
            .map(|slot| {
                if own.contains(slot) {
                    column(slot.item)
                } else {
                    SqlExpr::Null
                }
            })
            .collect();

        let depth = chain.len();
        let mut filters = vec![SqlExpr::IsNotNull(Box::new(column(&chain[depth - 1].id)))];
        let count = tokens.len();
        for (index, token) in tokens.iter().enumerate() {
            let last = index + 1 == count;
            // Deeper tokens need the levels below this one.
            let highest = (depth - 1).min(depth - count + index);
            let matches = chain[index..=highest]
                .iter()
                .map(|level| {
                    let item = if captions {
                        level.caption_item()
                    } else {
                        level.id.as_str()
                    };
                    self.token_match(column(item), token, last)
                })
                .collect();
            filters.push(SqlExpr::Junction {
                op: SqlJunction::Or,
                exprs: matches,
            });
        }

        let mut grouped = BTreeSet::new();
        let group_by = own
            .iter()
            .filter(|slot| grouped.insert(slot.item))
            .map(|slot| column(slot.item))
            .collect();

        SelectQuery {
            select,
            from: TableRef {
                source: source.to_string(),
            },
            filters,
            group_by,
        }
    }

    fn token_match(&self, column: SqlExpr, token: &str, substring: bool) -> SqlExpr {
        let case_insensitive = self.engine.config().suggest.case_insensitive;
        let (column, token) = if case_insensitive {
            (SqlExpr::Lower(Box::new(column)), token.to_lowercase())
        } else {
            (column, token.to_string())
        };
        if substring {
            let pattern = format!("%{}%", escape_like(&token));
            SqlExpr::binary(SqlBinaryOperator::Like, column, SqlExpr::Param(pattern.into()))
        } else {
            SqlExpr::binary(SqlBinaryOperator::Eq, column, SqlExpr::Param(token.into()))
        }
    }
}

/// Columns of all chains in first-occurrence order, captions after their level.
fn global_slots<'h>(chains: &[Vec<&'h HierarchyLevel>], captions: bool) -> Vec<Slot<'h>> {
    let mut slots = Vec::new();
    for level in chains.iter().flatten() {
        let mut candidates = vec![Slot {
            item: level.id.as_str(),
            caption_for: None,
        }];
        if captions {
            candidates.push(Slot {
                item: level.caption_item(),
                caption_for: Some(level.id.as_str()),
            });
        }
        for slot in candidates {
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
    }
    slots
}
