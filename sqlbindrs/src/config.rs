//! Configuration system for the SQL binding engine.
//!
//! Supports TOML-based configuration; every field has a built-in default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlBindError};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolution: ResolutionConfig,
    pub params: ParamsConfig,
    pub suggest: SuggestConfig,
}

/// Binding resolution and rendering settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Prefix of generated table aliases (default: "t", giving t1, t2, ...).
    pub alias_prefix: String,
    /// Trailing marker on a column reference requesting the unqualified form (default: '-').
    pub unqualified_marker: char,
}

/// Bind parameter placeholder settings used by `transform_params`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParamsConfig {
    /// Template variable under which parameters are addressed (default: "p").
    pub keyword: String,
    /// Separator between repeated placeholders (default: ", ").
    pub separator: String,
    /// Bind placeholder token (default: "?").
    pub placeholder: String,
}

/// Hierarchical suggest query settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SuggestConfig {
    /// Level separator used when a request does not name one.
    pub level_separator: Option<char>,
    /// Compare search tokens case-insensitively (default: true).
    pub case_insensitive: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            alias_prefix: "t".to_string(),
            unqualified_marker: '-',
        }
    }
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            keyword: "p".to_string(),
            separator: ", ".to_string(),
            placeholder: "?".to_string(),
        }
    }
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            level_separator: None,
            case_insensitive: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SqlBindError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(toml_str)
            .map_err(|e| SqlBindError::Config(format!("failed to parse config: {e}")))?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `SQLBIND_CONFIG` environment variable
    /// 2. `./sqlbind.toml` (current directory)
    /// 3. `~/.config/sqlbind/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("SQLBIND_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from SQLBIND_CONFIG");
                return cfg;
            }
        }

        if let Ok(cfg) = Self::from_file("sqlbind.toml") {
            tracing::info!("loaded config from ./sqlbind.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlbind").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    fn check(&self) -> Result<()> {
        if self.resolution.alias_prefix.is_empty() {
            return Err(SqlBindError::Config(
                "resolution.alias_prefix must not be empty".to_string(),
            ));
        }
        if self.params.keyword.is_empty() {
            return Err(SqlBindError::Config(
                "params.keyword must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
