//! Two-pass translation of binding templates into SQL.
//!
//! A template is plain SQL text with logical sources as template variables:
//!
//! ```text
//! SELECT {{ sales.country }}, {{ sales["revenue-"] }} FROM {{ sales }} WHERE {{ sales.year }} = ?
//! ```
//!
//! The first pass records, per logical source, every logical column the text
//! touches. The second pass renders the same text again; each logical source is
//! now resolved to one physical binding set using the complete column set from
//! the first pass, column references become `alias.column` (or bare `column`
//! with the trailing unqualified marker), and `{{ sales }}` becomes the aliased
//! table reference.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use minijinja::{Environment, UndefinedBehavior, Value};
use once_cell::sync::Lazy;

use crate::bindings::BindingSet;
use crate::catalog::BindingRegistry;
use crate::config::EngineConfig;
use crate::error::{Result, SqlBindError};
use crate::subject::Subject;

mod generation;
mod lookup;
mod params;

use generation::GenerationContext;
use lookup::LookupContext;

pub use generation::{ResolvedColumn, ResolvedSource};

/// Lookup and parameter passes never fail on unknown names.
static TOLERANT_ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env
});

static STRICT_ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
});

/// Builtin template globals (`range`, `dict`, ...) are never logical sources.
static TEMPLATE_GLOBALS: Lazy<HashSet<String>> = Lazy::new(|| {
    STRICT_ENV
        .globals()
        .map(|(name, _)| name.to_owned())
        .collect()
});

pub(crate) fn is_template_global(name: &str) -> bool {
    TEMPLATE_GLOBALS.contains(name)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output of [`SqlEngine::transform`].
#[derive(Debug, Clone)]
pub struct RenderedSql {
    pub sql: String,
    /// Logical source names the template resolved. The value is a group marker
    /// kept for compatibility; it is always empty.
    pub requested_sources: BTreeMap<String, String>,
    /// Resolution records in order of first resolution.
    pub sources: Vec<ResolvedSource>,
    /// Columns referenced before their source's table reference, in encounter order.
    pub selected_columns: Vec<ResolvedColumn>,
    /// Every referenced column once per source, in encounter order.
    pub all_columns: Vec<ResolvedColumn>,
}

impl RenderedSql {
    /// Distinct physical binding sets used by the statement.
    pub fn resolved_binding_sets(&self) -> Vec<Arc<BindingSet>> {
        let mut seen = HashSet::new();
        self.sources
            .iter()
            .filter(|source| seen.insert(source.binding_set.name.clone()))
            .map(|source| source.binding_set.clone())
            .collect()
    }
}

pub struct SqlEngine {
    registry: Arc<dyn BindingRegistry>,
    config: EngineConfig,
}

impl SqlEngine {
    pub fn new(registry: Arc<dyn BindingRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<dyn BindingRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn BindingRegistry> {
        &self.registry
    }

    /// Resolve and render a binding template for `subject`.
    ///
    /// `variables` are plain template variables visible only while rendering;
    /// they shadow logical sources of the same name. Any resolution or security
    /// failure aborts the whole call.
    pub fn transform(
        &self,
        template: &str,
        subject: Arc<dyn Subject>,
        variables: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> Result<RenderedSql> {
        let lookups = self.lookup_phase(template);
        tracing::debug!(sources = lookups.len(), "lookup phase finished");

        let variables: BTreeMap<String, Value> = variables
            .map(|vars| {
                vars.iter()
                    .map(|(name, value)| (name.clone(), Value::from_serialize(value)))
                    .collect()
            })
            .unwrap_or_default();
        let context = GenerationContext::new(
            self.registry.clone(),
            subject,
            lookups,
            variables,
            &self.config.resolution,
        );
        let rendered = STRICT_ENV.render_str(template, Value::from_object(context.clone()));
        let outcome = context.finish();

        if let Some(failure) = outcome.failure {
            tracing::debug!(error = %failure, "generation phase failed");
            return Err(failure);
        }
        let sql = rendered.map_err(|e| SqlBindError::TemplateSyntax(e.to_string()))?;
        tracing::trace!(sql = %sql, "rendered binding template");

        Ok(RenderedSql {
            sql,
            requested_sources: outcome
                .sources
                .iter()
                .map(|source| (source.name.clone(), String::new()))
                .collect(),
            sources: outcome.sources,
            selected_columns: outcome.selected,
            all_columns: outcome.all,
        })
    }

    /// Replace `{{ <keyword>.<name> }}` with bind placeholders.
    ///
    /// Each reference renders as N placeholders joined by `separator`; N is 1
    /// without `multiplicities`, otherwise the mapped count. Returns the text and
    /// the referenced names in encounter order (duplicates included).
    ///
    /// With `multiplicities`, a name missing from the map renders as nothing and
    /// is not reported.
    pub fn transform_params(
        &self,
        template: &str,
        multiplicities: Option<&HashMap<String, usize>>,
        keyword: &str,
        separator: &str,
    ) -> Result<(String, Vec<String>)> {
        params::substitute(
            template,
            multiplicities,
            keyword,
            separator,
            &self.config.params.placeholder,
        )
    }

    /// [`Self::transform_params`] with the configured keyword and separator.
    pub fn transform_params_default(
        &self,
        template: &str,
        multiplicities: Option<&HashMap<String, usize>>,
    ) -> Result<(String, Vec<String>)> {
        let params = &self.config.params;
        self.transform_params(template, multiplicities, &params.keyword, &params.separator)
    }

    fn lookup_phase(&self, template: &str) -> BTreeMap<String, lookup::LookupRecord> {
        let context = LookupContext::new(self.config.resolution.unqualified_marker);
        if let Err(e) = TOLERANT_ENV.render_str(template, Value::from_object(context.clone())) {
            // The generation pass reports template errors.
            tracing::debug!(error = %e, "lookup phase stopped early");
        }
        context.into_records()
    }
}
