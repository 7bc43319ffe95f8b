use super::change::Row;
use super::config::StoreConfig;
use super::session::MemorySession;
use super::table::Table;
use crate::core::{OrmError, Result, Value};
use crate::metadata::Metamodel;
use crate::session::{SessionConfig, UnitOfWork};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ordered log of every statement the store executed.
#[derive(Debug, Clone, Default)]
pub struct StatementLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StatementLog {
    pub fn record(&self, sql: &str) -> Result<()> {
        self.entries.lock()?.push(sql.to_string());
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock()?.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        Ok(())
    }
}

pub(crate) struct StoreInner {
    pub(crate) metamodel: Arc<Metamodel>,
    pub(crate) config: StoreConfig,
    pub(crate) tables: RwLock<HashMap<String, Table>>,
    pub(crate) log: StatementLog,
}

/// In-memory relational backend implementing the session coordinator.
///
/// One table per mapped entity. Cheap to clone; clones share tables and the
/// statement log.
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self::build(metamodel, StoreConfig::default())
    }

    pub fn with_config(metamodel: Arc<Metamodel>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(metamodel, config))
    }

    fn build(metamodel: Arc<Metamodel>, config: StoreConfig) -> Self {
        let tables = metamodel
            .entities()
            .iter()
            .map(|entity| {
                (
                    entity.table().to_string(),
                    Table::new(entity.table(), entity.identity().column()),
                )
            })
            .collect::<HashMap<_, _>>();

        debug!(
            database = %config.database,
            tables = tables.len(),
            "memory store created"
        );

        Self {
            inner: Arc::new(StoreInner {
                metamodel,
                config,
                tables: RwLock::new(tables),
                log: StatementLog::default(),
            }),
        }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.inner.metamodel
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Begins a new transaction.
    pub fn open_session(&self) -> Arc<MemorySession> {
        Arc::new(MemorySession::begin(self.clone()))
    }

    /// A unit of work running in a fresh transaction of this store.
    pub fn unit_of_work(&self, config: SessionConfig) -> Result<UnitOfWork> {
        UnitOfWork::new(Arc::clone(&self.inner.metamodel), self.open_session(), config)
    }

    pub fn statements(&self) -> Result<Vec<String>> {
        self.inner.log.entries()
    }

    pub fn statement_count(&self) -> Result<usize> {
        self.inner.log.len()
    }

    pub fn clear_statements(&self) -> Result<()> {
        self.inner.log.clear()
    }

    pub(crate) fn log_statement(&self, sql: &str) -> Result<()> {
        if self.inner.config.log_statements {
            info!(database = %self.inner.config.database, sql, "statement");
        } else {
            debug!(database = %self.inner.config.database, sql, "statement");
        }
        self.inner.log.record(sql)
    }

    /// Current content of a row, by entity name and identity.
    pub async fn row(&self, entity: &str, identity: &Value) -> Result<Option<Row>> {
        let table = self.inner.metamodel.entity(entity)?.table().to_string();
        let tables = self.inner.tables.read().await;
        let table = tables
            .get(&table)
            .ok_or_else(|| OrmError::ExecutionError(format!("table '{}' does not exist", table)))?;
        Ok(table.get(identity).cloned())
    }

    pub async fn row_count(&self, entity: &str) -> Result<usize> {
        let table = self.inner.metamodel.entity(entity)?.table().to_string();
        let tables = self.inner.tables.read().await;
        Ok(tables.get(&table).map(Table::len).unwrap_or(0))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_statement_log() {
        let log = StatementLog::default();
        assert!(log.is_empty().unwrap());

        log.record("select 1").unwrap();
        log.record("select 2").unwrap();
        assert_eq!(log.entries().unwrap(), vec!["select 1", "select 2"]);

        log.clear().unwrap();
        assert_eq!(log.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tables_created_per_entity() {
        let store = MemoryStore::new(Arc::new(fixtures::customer_supplemental().unwrap()));
        assert_eq!(store.row_count("Customer").await.unwrap(), 0);
        assert_eq!(store.row_count("SupplementalInfo").await.unwrap(), 0);
        assert!(store.row_count("Unknown").await.is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let model = Arc::new(fixtures::customer_supplemental().unwrap());
        let config = StoreConfig::new().max_fetch_depth(0);
        assert!(matches!(
            MemoryStore::with_config(model, config),
            Err(OrmError::ConfigError(_))
        ));
    }
}
