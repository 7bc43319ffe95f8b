use super::change::{Change, Row};
use super::memory::MemoryStore;
use super::sql::{SelectPlan, evaluate_expression, render_delete, render_insert, render_update};
use super::table::Table;
use super::transaction::{Transaction, TransactionId, TransactionState};
use crate::core::{OrmError, Result, Value};
use crate::metadata::{EntityDescriptor, FetchGroup, IdentityGeneration};
use crate::session::{EntityRow, SessionCoordinator, WriteRequest, WriteResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// One transaction against a `MemoryStore`.
///
/// Mutations apply to the shared tables immediately and are recorded so that
/// rollback can undo them.
pub struct MemorySession {
    store: MemoryStore,
    transaction: Mutex<Transaction>,
}

impl MemorySession {
    pub(crate) fn begin(store: MemoryStore) -> Self {
        let transaction = Transaction::begin();
        debug!(transaction = %transaction.id(), "transaction started");
        Self {
            store,
            transaction: Mutex::new(transaction),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn transaction_id(&self) -> Result<TransactionId> {
        Ok(self.transaction.lock()?.id())
    }

    pub fn state(&self) -> Result<TransactionState> {
        Ok(self.transaction.lock()?.state())
    }

    fn ensure_active(&self) -> Result<()> {
        self.transaction.lock()?.ensure_active()
    }

    fn record(&self, change: Change) -> Result<()> {
        self.transaction.lock()?.record_change(change)
    }

    fn build_row(request: &WriteRequest<'_>, identity: &Value, base: Row) -> Result<(Row, Vec<(String, Value)>)> {
        let entity = request.entity;
        let mut row = base;
        row.insert(entity.identity().column().to_string(), identity.clone());

        for (name, value) in &request.values {
            let attr = entity.attribute(name)?;
            if attr.is_identity() {
                return Err(OrmError::ImmutableIdentity(format!("{}.{}", entity.name(), name)));
            }
            row.insert(attr.column().to_string(), value.clone());
        }

        let mut generated = Vec::with_capacity(request.generated.len());
        for (name, expression) in &request.generated {
            let value = evaluate_expression(expression)?;
            row.insert(entity.attribute(name)?.column().to_string(), value.clone());
            generated.push((name.clone(), value));
        }
        Ok((row, generated))
    }

    /// Owning foreign keys must reference existing rows.
    fn check_references(
        &self,
        tables: &HashMap<String, Table>,
        entity: &EntityDescriptor,
        row: &Row,
    ) -> Result<()> {
        for attr in entity.attributes() {
            let Some(association) = attr.association() else {
                continue;
            };
            if association.is_inverse() {
                continue;
            }
            let value = row.get(attr.column()).unwrap_or(&Value::Null);
            if value.is_null() {
                if !association.optional {
                    return Err(OrmError::ConstraintViolation(format!(
                        "{}.{} cannot be null",
                        entity.table(),
                        attr.column()
                    )));
                }
                continue;
            }
            let target = self.store.metamodel().entity(&association.target)?;
            let exists = tables
                .get(target.table())
                .is_some_and(|table| table.contains(value));
            if !exists {
                return Err(OrmError::ConstraintViolation(format!(
                    "{}.{} references missing {} {}",
                    entity.table(),
                    attr.column(),
                    target.name(),
                    value
                )));
            }
        }
        Ok(())
    }
}

fn missing_table(name: &str) -> OrmError {
    OrmError::ExecutionError(format!("table '{}' does not exist", name))
}

#[async_trait]
impl SessionCoordinator for MemorySession {
    fn is_active(&self) -> bool {
        self.transaction
            .lock()
            .map(|txn| txn.state().is_active())
            .unwrap_or(false)
    }

    async fn execute_fetch(
        &self,
        entity: &EntityDescriptor,
        identity: &Value,
        group: &FetchGroup,
    ) -> Result<Option<EntityRow>> {
        self.ensure_active()?;

        let plan = SelectPlan::build(
            self.store.metamodel(),
            entity,
            group,
            self.store.config().max_fetch_depth,
        )?;
        self.store.log_statement(&plan.to_sql())?;

        let tables = self.store.inner.tables.read().await;
        plan.execute(&tables, identity)
    }

    async fn execute_insert(&self, request: WriteRequest<'_>) -> Result<WriteResponse> {
        self.ensure_active()?;
        let entity = request.entity;
        self.store.log_statement(&render_insert(&request)?)?;

        let mut tables = self.store.inner.tables.write().await;
        let identity = match &request.identity {
            Some(identity) => identity.clone(),
            None if entity.identity_generation() == IdentityGeneration::Sequence => tables
                .get_mut(entity.table())
                .ok_or_else(|| missing_table(entity.table()))?
                .next_identity(),
            None => {
                return Err(OrmError::ConstraintViolation(format!(
                    "{}.{} cannot be null",
                    entity.table(),
                    entity.identity().column()
                )));
            }
        };

        let (row, generated) = Self::build_row(&request, &identity, Row::new())?;
        self.check_references(&tables, entity, &row)?;

        tables
            .get_mut(entity.table())
            .ok_or_else(|| missing_table(entity.table()))?
            .insert(identity.clone(), row)?;
        self.record(Change::InsertRow {
            table: entity.table().to_string(),
            identity: identity.clone(),
        })?;

        Ok(WriteResponse {
            identity,
            generated,
        })
    }

    async fn execute_update(&self, request: WriteRequest<'_>) -> Result<WriteResponse> {
        self.ensure_active()?;
        let entity = request.entity;
        let identity = request.identity.clone().ok_or_else(|| {
            OrmError::UnresolvableIdentity(entity.name().to_string())
        })?;
        self.store.log_statement(&render_update(&request)?)?;

        let mut tables = self.store.inner.tables.write().await;
        let current = tables
            .get(entity.table())
            .ok_or_else(|| missing_table(entity.table()))?
            .get(&identity)
            .cloned()
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: entity.name().to_string(),
                identity: identity.to_string(),
            })?;

        let (row, generated) = Self::build_row(&request, &identity, current)?;
        self.check_references(&tables, entity, &row)?;

        let old_row = tables
            .get_mut(entity.table())
            .ok_or_else(|| missing_table(entity.table()))?
            .update(&identity, row)
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: entity.name().to_string(),
                identity: identity.to_string(),
            })?;
        self.record(Change::UpdateRow {
            table: entity.table().to_string(),
            identity: identity.clone(),
            old_row,
        })?;

        Ok(WriteResponse {
            identity,
            generated,
        })
    }

    async fn execute_delete(&self, entity: &EntityDescriptor, identity: &Value) -> Result<()> {
        self.ensure_active()?;
        self.store.log_statement(&render_delete(entity))?;

        let mut tables = self.store.inner.tables.write().await;
        let (position, old_row) = tables
            .get_mut(entity.table())
            .ok_or_else(|| missing_table(entity.table()))?
            .delete(identity)
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: entity.name().to_string(),
                identity: identity.to_string(),
            })?;
        self.record(Change::DeleteRow {
            table: entity.table().to_string(),
            identity: identity.clone(),
            position,
            old_row,
        })
    }

    async fn commit(&self) -> Result<()> {
        let mut transaction = self.transaction.lock()?;
        let changes = transaction.change_count();
        transaction.commit()?;
        debug!(
            transaction = %transaction.id(),
            changes,
            elapsed_us = transaction.duration().as_micros() as u64,
            "transaction committed"
        );
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let (id, undo) = {
            let mut transaction = self.transaction.lock()?;
            (transaction.id(), transaction.abort()?)
        };

        let mut tables = self.store.inner.tables.write().await;
        for change in &undo {
            let table = tables
                .get_mut(change.table_name())
                .ok_or_else(|| missing_table(change.table_name()))?;
            match change {
                Change::InsertRow { identity, .. } => {
                    table.delete(identity);
                }
                Change::UpdateRow {
                    identity, old_row, ..
                } => {
                    table.update(identity, old_row.clone());
                }
                Change::DeleteRow {
                    identity,
                    position,
                    old_row,
                    ..
                } => {
                    table.insert_at(*position, identity.clone(), old_row.clone());
                }
            }
        }

        debug!(transaction = %id, undone = undo.len(), "transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(fixtures::customer_supplemental().unwrap()))
    }

    #[tokio::test]
    async fn test_insert_fetch_and_log() {
        let store = store();
        let session = store.open_session();
        let model = Arc::clone(store.metamodel());
        let customer = model.entity("Customer").unwrap();

        assert_ok!(
            session
                .execute_insert(WriteRequest {
                    entity: customer,
                    identity: Some(Value::from(1)),
                    values: vec![
                        ("name".into(), Value::from("Acme Brick")),
                        ("supplemental_info".into(), Value::Null),
                    ],
                    generated: vec![],
                })
                .await
        );

        let row = session
            .execute_fetch(customer, &Value::from(1), customer.base_group())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Acme Brick")));

        assert_eq!(
            store.statements().unwrap(),
            vec![
                "insert into customer (id, name, supplemental_info) values (?, ?, ?)",
                "select t0.id, t0.name, t0.supplemental_info from customer t0 where t0.id = ?",
            ]
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_checked() {
        let store = store();
        let session = store.open_session();
        let model = Arc::clone(store.metamodel());
        let customer = model.entity("Customer").unwrap();

        let result = session
            .execute_insert(WriteRequest {
                entity: customer,
                identity: Some(Value::from(1)),
                values: vec![("supplemental_info".into(), Value::from(9))],
                generated: vec![],
            })
            .await;
        assert!(matches!(result, Err(OrmError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_rollback_undoes_changes() {
        let store = store();
        fixtures::seed_customer_supplemental(&store).await.unwrap();

        let session = store.open_session();
        let model = Arc::clone(store.metamodel());
        let customer = model.entity("Customer").unwrap();

        assert_ok!(
            session
                .execute_update(WriteRequest {
                    entity: customer,
                    identity: Some(Value::from(1)),
                    values: vec![("name".into(), Value::from("Renamed"))],
                    generated: vec![],
                })
                .await
        );
        assert_ok!(session.execute_delete(customer, &Value::from(1)).await);
        assert!(store.row("Customer", &Value::from(1)).await.unwrap().is_none());

        assert_ok!(session.rollback().await);
        assert!(!session.is_active());

        let row = store.row("Customer", &Value::from(1)).await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Acme Brick")));
    }

    #[tokio::test]
    async fn test_inactive_session_rejects_work() {
        let store = store();
        let session = store.open_session();
        assert_ok!(session.commit().await);
        assert_eq!(session.state().unwrap(), TransactionState::Committed);

        let model = Arc::clone(store.metamodel());
        let customer = model.entity("Customer").unwrap();
        assert_err!(
            session
                .execute_fetch(customer, &Value::from(1), customer.base_group())
                .await
        );
        assert_err!(session.commit().await);
    }
}
