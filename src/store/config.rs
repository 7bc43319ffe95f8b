use crate::core::{OrmError, Result};

/// Memory store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database name used in log events
    pub database: String,
    /// Maximum number of nested joins a single fetch may use
    pub max_fetch_depth: usize,
    /// Log every statement at info level instead of debug
    pub log_statements: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "lazyorm".to_string(),
            max_fetch_depth: 3,
            log_statements: false,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn max_fetch_depth(mut self, depth: usize) -> Self {
        self.max_fetch_depth = depth;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(OrmError::ConfigError("database name cannot be empty".into()));
        }
        if self.max_fetch_depth == 0 {
            return Err(OrmError::ConfigError(
                "max_fetch_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
