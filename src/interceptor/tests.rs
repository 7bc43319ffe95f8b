use super::*;
use crate::core::EntityKey;
use crate::fixtures;
use crate::metadata::{AttributeMapping, EntityMapping};
use crate::proxy::ProxyState;
use crate::session::{WriteRequest, WriteResponse};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Serves scripted rows and records every fetch.
#[derive(Default)]
struct ScriptedCoordinator {
    inactive: AtomicBool,
    rows: Mutex<HashMap<(String, String), EntityRow>>,
    fetches: Mutex<Vec<String>>,
}

impl ScriptedCoordinator {
    fn script(&self, group: &str, row: EntityRow) {
        let key = format!("{}#{}", row.entity, row.identity);
        self.rows
            .lock()
            .unwrap()
            .insert((key, group.to_string()), row);
    }

    fn script_as(&self, key: &str, group: &str, row: EntityRow) {
        self.rows
            .lock()
            .unwrap()
            .insert((key.to_string(), group.to_string()), row);
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionCoordinator for ScriptedCoordinator {
    fn is_active(&self) -> bool {
        !self.inactive.load(Ordering::SeqCst)
    }

    async fn execute_fetch(
        &self,
        entity: &EntityDescriptor,
        identity: &Value,
        group: &FetchGroup,
    ) -> Result<Option<EntityRow>> {
        let key = format!("{}#{}", entity.name(), identity);
        self.fetches
            .lock()
            .unwrap()
            .push(format!("{}/{}", key, group.name()));
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(key, group.name().to_string()))
            .cloned())
    }

    async fn execute_insert(&self, _request: WriteRequest<'_>) -> Result<WriteResponse> {
        Err(OrmError::UnsupportedOperation("insert".into()))
    }

    async fn execute_update(&self, _request: WriteRequest<'_>) -> Result<WriteResponse> {
        Err(OrmError::UnsupportedOperation("update".into()))
    }

    async fn execute_delete(&self, _entity: &EntityDescriptor, _identity: &Value) -> Result<()> {
        Err(OrmError::UnsupportedOperation("delete".into()))
    }

    async fn commit(&self) -> Result<()> {
        self.inactive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.inactive.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    coordinator: Arc<ScriptedCoordinator>,
    interceptor: LazyAttributeInterceptor,
    context: PersistenceContext,
}

impl Harness {
    fn new(model: Metamodel) -> Self {
        let coordinator = Arc::new(ScriptedCoordinator::default());
        let interceptor = LazyAttributeInterceptor::new(Arc::new(model), coordinator.clone());
        Self {
            coordinator,
            interceptor,
            context: PersistenceContext::new(),
        }
    }

    fn reference(&mut self, entity: &str, identity: i64) -> EntityRef {
        let model = Arc::clone(self.interceptor.metamodel());
        self.context
            .reference(model.entity(entity).unwrap(), Value::from(identity))
    }

    async fn read(&mut self, entity: EntityRef, attribute: &str) -> Result<AttributeValue> {
        self.interceptor
            .read(&mut self.context, entity, attribute)
            .await
    }

    fn state(&self, entity: EntityRef) -> ProxyState {
        self.context.get(entity).unwrap().state().clone()
    }

    fn association(&self, entity: EntityRef, index: usize) -> AssociationState {
        self.context
            .get(entity)
            .unwrap()
            .association(index)
            .unwrap()
            .state()
    }
}

fn library() -> Harness {
    let harness = Harness::new(fixtures::library().unwrap());
    harness.coordinator.script(
        "base",
        EntityRow::new("Book", 1)
            .value("title", "The Dispossessed")
            .value("author", 1)
            .value("isbn", "978-0-06-051275-3"),
    );
    harness.coordinator.script(
        "text",
        EntityRow::new("Book", 1)
            .value("synopsis", "Two worlds")
            .value("content", "The wall"),
    );
    harness
        .coordinator
        .script("DEFAULT", EntityRow::new("Book", 1).value("cover", "cover.png"));
    harness
}

// Book attribute indices
const AUTHOR: usize = 2;

#[tokio::test]
async fn test_identity_read_is_passthrough() {
    let mut h = library();
    let book = h.reference("Book", 1);

    let id = h.read(book, "id").await.unwrap();
    assert_eq!(id, AttributeValue::Scalar(Value::from(1)));
    assert!(h.coordinator.fetches().is_empty());
    assert_eq!(h.interceptor.stats().passthrough_reads, 1);
    assert_eq!(h.state(book), ProxyState::IdentityOnly);
}

#[tokio::test]
async fn test_each_group_loads_once() {
    let mut h = library();
    let book = h.reference("Book", 1);

    let synopsis = h.read(book, "synopsis").await.unwrap();
    assert_eq!(synopsis.as_value(), Some(&Value::from("Two worlds")));
    h.read(book, "content").await.unwrap();
    assert_eq!(h.coordinator.fetches(), vec!["Book#1/text"]);
    assert!(matches!(h.state(book), ProxyState::PartiallyLoaded(_)));

    h.read(book, "title").await.unwrap();
    h.read(book, "isbn").await.unwrap();
    h.read(book, "cover").await.unwrap();
    assert_eq!(
        h.coordinator.fetches(),
        vec!["Book#1/text", "Book#1/base", "Book#1/DEFAULT"]
    );
    assert_eq!(h.state(book), ProxyState::FullyLoaded);
    assert_eq!(h.interceptor.stats().lazy_loads, 3);
}

#[tokio::test]
async fn test_select_fetched_association_is_identity_only() {
    let mut h = library();
    let book = h.reference("Book", 1);

    let author = h.read(book, "author").await.unwrap().as_entity().unwrap();
    assert_eq!(h.state(author), ProxyState::IdentityOnly);
    assert_eq!(h.association(book, AUTHOR), AssociationState::IdentityOnlyProxy);
    assert_eq!(h.coordinator.fetches(), vec!["Book#1/base"]);
}

#[tokio::test]
async fn test_initialize_association() {
    let mut h = library();
    h.coordinator
        .script("base", EntityRow::new("Author", 1).value("name", "Le Guin"));
    let book = h.reference("Book", 1);

    let author = h
        .interceptor
        .initialize_association(&mut h.context, book, "author")
        .await
        .unwrap()
        .unwrap();
    assert!(h.context.is_initialized(author));
    assert_eq!(h.association(book, AUTHOR), AssociationState::Loaded);
    assert_eq!(h.coordinator.fetches(), vec!["Book#1/base", "Author#1/base"]);
}

#[tokio::test]
async fn test_failed_association_load_reverts_to_proxy() {
    let mut h = library();
    let book = h.reference("Book", 1);

    let err = h
        .interceptor
        .initialize_association(&mut h.context, book, "author")
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::EntityNotFound { .. }));
    assert_eq!(h.association(book, AUTHOR), AssociationState::IdentityOnlyProxy);
}

#[tokio::test]
async fn test_joined_association_needs_no_query() {
    let mut h = Harness::new(fixtures::customer_supplemental().unwrap());
    h.coordinator.script(
        "base",
        EntityRow::new("SupplementalInfo", 1)
            .value("something", "extra details")
            .join(
                "customer",
                Joined::Row(Box::new(
                    EntityRow::new("Customer", 1)
                        .value("name", "Acme Brick")
                        .value("supplemental_info", 1),
                )),
            ),
    );
    let info = h.reference("SupplementalInfo", 1);

    h.read(info, "something").await.unwrap();
    assert_eq!(h.coordinator.fetches().len(), 1);
    assert_eq!(h.association(info, 1), AssociationState::Joined);

    let customer = h.read(info, "customer").await.unwrap().as_entity().unwrap();
    assert_eq!(h.association(info, 1), AssociationState::Loaded);
    assert_eq!(h.state(customer), ProxyState::FullyLoaded);

    let name = h.read(customer, "name").await.unwrap();
    assert_eq!(name.as_value(), Some(&Value::from("Acme Brick")));
    assert_eq!(h.coordinator.fetches().len(), 1);
    assert_eq!(h.interceptor.stats().join_initializations, 1);
}

#[tokio::test]
async fn test_inactive_coordinator_is_detached_access() {
    let mut h = library();
    let book = h.reference("Book", 1);
    h.coordinator.commit().await.unwrap();

    let err = h.read(book, "title").await.unwrap_err();
    assert!(matches!(err, OrmError::DetachedLazyAccess { .. }));
    assert!(h.coordinator.fetches().is_empty());

    // identity needs no fetch
    assert!(h.read(book, "id").await.is_ok());
}

#[tokio::test]
async fn test_identity_mismatch_leaves_state_untouched() {
    let mut h = library();
    h.coordinator
        .script_as("Book#7", "base", EntityRow::new("Book", 8).value("title", "Wrong"));
    let book = h.reference("Book", 7);

    let err = h.read(book, "title").await.unwrap_err();
    assert!(matches!(err, OrmError::IdentityMismatch { .. }));
    assert!(err.is_fatal());
    assert_eq!(h.state(book), ProxyState::IdentityOnly);
}

fn joined_customer() -> Joined {
    Joined::Row(Box::new(
        EntityRow::new("Customer", 1)
            .value("name", "Acme Brick")
            .value("supplemental_info", 1),
    ))
}

#[tokio::test]
async fn test_rejected_owner_row_leaves_joined_target_unloaded() {
    let mut h = Harness::new(fixtures::customer_supplemental().unwrap());
    h.coordinator.script(
        "base",
        EntityRow::new("SupplementalInfo", 1).join("customer", joined_customer()),
    );
    let info = h.reference("SupplementalInfo", 1);

    let err = h.read(info, "something").await.unwrap_err();
    assert!(matches!(err, OrmError::IncompleteFetch { ref attribute, .. } if attribute == "something"));
    assert_eq!(h.state(info), ProxyState::IdentityOnly);
    assert!(h.context.lookup(&EntityKey::new("Customer", 1)).is_none());

    h.coordinator.script(
        "base",
        EntityRow::new("SupplementalInfo", 1)
            .value("something", "extra details")
            .value("rating", 5)
            .join("customer", joined_customer()),
    );
    let err = h.read(info, "something").await.unwrap_err();
    assert!(matches!(err, OrmError::InconsistentFetchGroup(_)));
    assert!(h.context.lookup(&EntityKey::new("Customer", 1)).is_none());

    h.coordinator.script(
        "base",
        EntityRow::new("SupplementalInfo", 1)
            .value("something", "extra details")
            .join("customer", joined_customer()),
    );
    h.read(info, "something").await.unwrap();
    let customer = h.read(info, "customer").await.unwrap().as_entity().unwrap();
    assert_eq!(h.state(customer), ProxyState::FullyLoaded);
    assert_eq!(h.coordinator.fetches().len(), 3);
}

#[tokio::test]
async fn test_incomplete_joined_row_rejects_the_whole_fetch() {
    let mut h = Harness::new(fixtures::customer_supplemental().unwrap());
    h.coordinator.script(
        "base",
        EntityRow::new("SupplementalInfo", 1)
            .value("something", "extra details")
            .join(
                "customer",
                Joined::Row(Box::new(EntityRow::new("Customer", 1).value("name", "Acme Brick"))),
            ),
    );
    let info = h.reference("SupplementalInfo", 1);

    let err = h.read(info, "something").await.unwrap_err();
    assert!(matches!(err, OrmError::IncompleteFetch { ref entity, .. } if entity == "Customer"));
    assert_eq!(h.state(info), ProxyState::IdentityOnly);
}

#[tokio::test]
async fn test_extra_fetched_attribute_is_inconsistent() {
    let mut h = library();
    h.coordinator.script(
        "DEFAULT",
        EntityRow::new("Book", 2)
            .value("cover", "x.png")
            .value("title", "Out of group"),
    );
    let book = h.reference("Book", 2);

    let err = h.read(book, "cover").await.unwrap_err();
    assert!(matches!(err, OrmError::InconsistentFetchGroup(_)));
}

#[tokio::test]
async fn test_overlay_write_skips_the_fetch() {
    let mut h = library();
    let book = h.reference("Book", 1);

    h.interceptor
        .write(&mut h.context, book, "synopsis", Value::from("draft"))
        .await
        .unwrap();
    assert!(h.coordinator.fetches().is_empty());
    assert_eq!(h.interceptor.stats().overlay_writes, 1);

    let synopsis = h.read(book, "synopsis").await.unwrap();
    assert_eq!(synopsis.as_value(), Some(&Value::from("draft")));
    assert!(h.coordinator.fetches().is_empty());

    h.read(book, "content").await.unwrap();
    let synopsis = h.read(book, "synopsis").await.unwrap();
    assert_eq!(synopsis.as_value(), Some(&Value::from("draft")));
    assert_eq!(h.coordinator.fetches(), vec!["Book#1/text"]);
    assert!(h.context.get(book).unwrap().is_dirty());
}

#[tokio::test]
async fn test_association_write_loads_group_first() {
    let mut h = library();
    let book = h.reference("Book", 1);
    let other = h.reference("Author", 2);

    h.interceptor
        .write_association(&mut h.context, book, "author", Some(other))
        .await
        .unwrap();
    assert_eq!(h.coordinator.fetches(), vec!["Book#1/base"]);
    assert_eq!(h.interceptor.stats().load_before_writes, 1);

    let author = h.read(book, "author").await.unwrap();
    assert_eq!(author.as_entity(), Some(other));
    assert!(h.context.get(book).unwrap().is_dirty());
}

#[tokio::test]
async fn test_identity_is_immutable() {
    let mut h = library();
    let book = h.reference("Book", 1);

    let err = h
        .interceptor
        .write(&mut h.context, book, "id", Value::from(2))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::ImmutableIdentity(_)));
}

#[tokio::test]
async fn test_removed_instance_keeps_loaded_state() {
    let mut h = library();
    let book = h.reference("Book", 1);
    h.read(book, "title").await.unwrap();
    h.context.get_mut(book).unwrap().mark_removed();

    assert!(h.read(book, "title").await.is_ok());
    let err = h.read(book, "synopsis").await.unwrap_err();
    assert!(matches!(err, OrmError::EntityRemoved { .. }));
    assert_eq!(h.coordinator.fetches().len(), 1);
}

#[tokio::test]
async fn test_post_load_fires_once() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let model = Metamodel::builder()
        .entity(
            EntityMapping::new("Note", "note")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("text"))
                .callback(LifecycleEvent::PostLoad, "countLoads"),
        )
        .callback("countLoads", move |ctx| {
            assert_eq!(ctx.get("text"), Some(&Value::from("hello")));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    let mut h = Harness::new(model);
    h.coordinator
        .script("base", EntityRow::new("Note", 1).value("text", "hello"));
    let note = h.reference("Note", 1);

    h.read(note, "text").await.unwrap();
    h.read(note, "text").await.unwrap();
    h.interceptor.initialize(&mut h.context, note).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
