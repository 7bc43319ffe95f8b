// ============================================================================
// Generated Values
// ============================================================================
//
// Attribute values produced by the framework or the database instead of the
// caller. In-memory generators run before the statement is issued; database
// generation references an SQL expression inside the statement itself and
// the store reports the resulting value back.
//
// ============================================================================

use crate::core::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// When a generated value is (re)computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTiming {
    /// Generated on INSERT only
    Insert,
    /// Generated on INSERT and on every UPDATE
    Always,
}

pub type ValueGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
pub enum ValueGeneration {
    InMemory {
        timing: GenerationTiming,
        generator: ValueGenerator,
    },
    Database {
        timing: GenerationTiming,
        expression: String,
    },
}

impl ValueGeneration {
    pub fn in_memory<F>(timing: GenerationTiming, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::InMemory {
            timing,
            generator: Arc::new(generator),
        }
    }

    /// Value computed by the database from `expression`, e.g. `current_timestamp`.
    pub fn database(timing: GenerationTiming, expression: impl Into<String>) -> Self {
        Self::Database {
            timing,
            expression: expression.into(),
        }
    }

    pub fn timing(&self) -> GenerationTiming {
        match self {
            Self::InMemory { timing, .. } | Self::Database { timing, .. } => *timing,
        }
    }

    pub fn applies_on_update(&self) -> bool {
        self.timing() == GenerationTiming::Always
    }

    pub fn database_expression(&self) -> Option<&str> {
        match self {
            Self::Database { expression, .. } => Some(expression),
            Self::InMemory { .. } => None,
        }
    }

    pub fn generate_in_memory(&self) -> Option<Value> {
        match self {
            Self::InMemory { generator, .. } => Some(generator()),
            Self::Database { .. } => None,
        }
    }
}

impl fmt::Debug for ValueGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory { timing, .. } => f
                .debug_struct("InMemory")
                .field("timing", timing)
                .finish_non_exhaustive(),
            Self::Database { timing, expression } => f
                .debug_struct("Database")
                .field("timing", timing)
                .field("expression", expression)
                .finish(),
        }
    }
}

/// How an entity's identity is produced on persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityGeneration {
    /// Caller supplies the identity
    #[default]
    Assigned,
    /// Store assigns the next value of the table's sequence
    Sequence,
    /// Random UUID generated before the insert
    Uuid,
}

impl IdentityGeneration {
    pub fn generate_in_memory(&self) -> Option<Value> {
        match self {
            Self::Uuid => Some(Value::Text(Uuid::new_v4().to_string())),
            Self::Assigned | Self::Sequence => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing() {
        let insert_only = ValueGeneration::database(GenerationTiming::Insert, "current_timestamp");
        assert!(!insert_only.applies_on_update());
        assert_eq!(insert_only.database_expression(), Some("current_timestamp"));

        let always = ValueGeneration::in_memory(GenerationTiming::Always, || Value::from("x"));
        assert!(always.applies_on_update());
        assert_eq!(always.generate_in_memory(), Some(Value::from("x")));
    }

    #[test]
    fn test_uuid_identity() {
        let id = IdentityGeneration::Uuid.generate_in_memory().unwrap();
        assert_eq!(id.as_str().unwrap().len(), 36);
        assert!(IdentityGeneration::Sequence.generate_in_memory().is_none());
    }
}
