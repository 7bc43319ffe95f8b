use crate::core::{Result, Value};
use crate::metadata::{EntityDescriptor, FetchGroup};
use async_trait::async_trait;

/// One fetched row, keyed by attribute name.
///
/// `values` holds basic attributes and the foreign keys of select-fetched
/// associations. `joined` holds join-fetched associations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub entity: String,
    pub identity: Value,
    pub values: Vec<(String, Value)>,
    pub joined: Vec<(String, Joined)>,
}

impl EntityRow {
    pub fn new(entity: impl Into<String>, identity: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            identity: identity.into(),
            values: Vec::new(),
            joined: Vec::new(),
        }
    }

    pub fn value(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((attribute.into(), value.into()));
        self
    }

    pub fn join(mut self, attribute: impl Into<String>, joined: Joined) -> Self {
        self.joined.push((attribute.into(), joined));
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, value)| value)
    }
}

/// Result of joining an association's target into the owner's query.
#[derive(Debug, Clone, PartialEq)]
pub enum Joined {
    /// The target's base group, read in the same statement
    Row(Box<EntityRow>),
    /// Only the target identity is known (join depth or cycle limit)
    Reference(Value),
    /// No target
    Absent,
}

/// Insert or update of one entity.
#[derive(Debug, Clone)]
pub struct WriteRequest<'a> {
    pub entity: &'a EntityDescriptor,
    /// `None` on insert when the store assigns the identity
    pub identity: Option<Value>,
    /// Column-backed attribute values, by attribute name
    pub values: Vec<(String, Value)>,
    /// Database-generated attributes and their SQL expressions
    pub generated: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    pub identity: Value,
    /// Values the database computed for `WriteRequest::generated`
    pub generated: Vec<(String, Value)>,
}

/// The transactional scope lazy loading runs in.
///
/// Injected into each unit of work; every lazy fetch goes through it.
#[async_trait]
pub trait SessionCoordinator: Send + Sync {
    /// Whether a transaction is open and fetches may be issued.
    fn is_active(&self) -> bool;

    /// Reads one fetch group of one entity, joining the group's
    /// join-fetched associations. `None` when no such row exists.
    async fn execute_fetch(
        &self,
        entity: &EntityDescriptor,
        identity: &Value,
        group: &FetchGroup,
    ) -> Result<Option<EntityRow>>;

    async fn execute_insert(&self, request: WriteRequest<'_>) -> Result<WriteResponse>;

    async fn execute_update(&self, request: WriteRequest<'_>) -> Result<WriteResponse>;

    async fn execute_delete(&self, entity: &EntityDescriptor, identity: &Value) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}
