//! Query builders layered on top of [`crate::SqlEngine`].

pub mod generic;
pub mod suggest;

pub use generic::{ColumnMeta, GeneratedSql, SqlStatement, SqlTemplateGenerator};
pub use suggest::{
    HierarchyLevel, SuggestColumn, SuggestHierarchy, SuggestQuery, SuggestQueryBuilder,
    SuggestRequest,
};
