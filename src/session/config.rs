use crate::core::{OrmError, Result};

/// Unit of work configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hand out identity-only proxies from `get_reference`
    pub allow_enhancement_as_proxy: bool,
    /// Flush dirty instances before committing
    pub flush_on_commit: bool,
    /// Name used in log events
    pub name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_enhancement_as_proxy: true,
            flush_on_commit: true,
            name: "session".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_enhancement_as_proxy(mut self, allow: bool) -> Self {
        self.allow_enhancement_as_proxy = allow;
        self
    }

    pub fn flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrmError::ConfigError("session name cannot be empty".into()));
        }
        Ok(())
    }
}
