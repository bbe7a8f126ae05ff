pub mod bindings;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod generators;
pub mod sql_ast;
pub mod subject;
pub mod subject_filters;

use std::path::Path;
use std::sync::Arc;

use crate::catalog::BindingCatalog;
use crate::config::EngineConfig;
use crate::error::Result;

/// Load a binding catalog from disk and build an engine over it.
pub fn load_engine<P: AsRef<Path>>(catalog_dir: P, config: EngineConfig) -> Result<SqlEngine> {
    let catalog = BindingCatalog::load_from_dir(catalog_dir)?;
    Ok(SqlEngine::with_config(Arc::new(catalog), config))
}

pub use bindings::{BindingItem, BindingSet, BindingSetGroup, SubjectFilterType};
pub use catalog::BindingRegistry;
pub use engine::{RenderedSql, ResolvedColumn, ResolvedSource, SqlEngine};
pub use error::SqlBindError;
pub use generators::{GeneratedSql, SqlTemplateGenerator, SuggestQueryBuilder};
pub use subject::{StaticSubject, Subject};
pub use subject_filters::SubjectFilters;
