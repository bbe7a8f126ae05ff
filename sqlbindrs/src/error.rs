use thiserror::Error;

pub type Result<T> = std::result::Result<T, SqlBindError>;

#[derive(Debug, Error)]
pub enum SqlBindError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("binding set {name} is ambiguous: {candidates} candidates cover the requested columns")]
    AmbiguousSource { name: String, candidates: usize },
    #[error("no mapping for {name} exposes column(s) {}", columns.join(", "))]
    ColumnNotFound { name: String, columns: Vec<String> },
    #[error("unknown binding set {0}")]
    UnknownSource(String),
    #[error("permission denied: {operation} on {binding_set}")]
    Security {
        operation: String,
        binding_set: String,
    },
    #[error("template error: {0}")]
    TemplateSyntax(String),
    #[error("hierarchy config error: {0}")]
    HierarchyConfig(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SqlBindError {
    pub(crate) fn read_denied(binding_set: &str) -> Self {
        SqlBindError::Security {
            operation: "read".to_string(),
            binding_set: binding_set.to_string(),
        }
    }
}
