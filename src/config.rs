use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Engine configuration.
///
/// Loaded from environment variables (call `dotenvy::dotenv()` first if a
/// `.env` file should be honored). All knobs have working defaults.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Global prefix for all quad-store table names
    pub table_prefix: String,

    /// Hard recursion bound for `+`/`*` property-path CTEs (1-1000)
    pub max_path_depth: u32,

    /// Whether the global variable-alias pre-pass runs before translation
    pub global_optimizer: bool,

    /// Alias-packing threshold for the global optimizer. When the number of
    /// distinct variables in a query exceeds this value, variables are packed
    /// behind a bounded number of canonical aliases round-robin. 0 disables
    /// packing.
    pub alias_packing_threshold: u32,

    /// Maximum number of entries held by the shared term cache
    pub term_cache_entries: usize,

    /// Whether DATATYPE() may join against the per-space datatype table.
    /// When false the translator falls back to regex-based inference.
    pub datatype_table_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table_prefix: "pgsparql".to_string(),
            max_path_depth: 10,
            global_optimizer: false,
            alias_packing_threshold: 0,
            term_cache_entries: 100_000,
            datatype_table_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables with validation.
    /// A `.env` file is honored when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self {
            table_prefix: env::var("PGSPARQL_TABLE_PREFIX")
                .unwrap_or_else(|_| "pgsparql".to_string()),
            max_path_depth: parse_env_var("PGSPARQL_MAX_PATH_DEPTH", "10")?,
            global_optimizer: parse_env_var("PGSPARQL_GLOBAL_OPTIMIZER", "false")?,
            alias_packing_threshold: parse_env_var("PGSPARQL_ALIAS_PACKING", "0")?,
            term_cache_entries: parse_env_var("PGSPARQL_TERM_CACHE_ENTRIES", "100000")?,
            datatype_table_enabled: parse_env_var("PGSPARQL_DATATYPE_TABLE", "true")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "table prefix cannot be empty".to_string(),
            ));
        }
        if !(1..=1000).contains(&self.max_path_depth) {
            return Err(ConfigError::Validation(format!(
                "max path depth must be between 1 and 1000, got {}",
                self.max_path_depth
            )));
        }
        Ok(())
    }
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
