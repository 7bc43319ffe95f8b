use super::change::Row;
use crate::core::{OrmError, Result, Value};

/// Rows of one entity table, keyed by identity, in insertion order.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    identity_column: String,
    rows: Vec<(Value, Row)>,
    next_sequence: i64,
}

impl Table {
    pub fn new(name: impl Into<String>, identity_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_column: identity_column.into(),
            rows: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, identity: &Value) -> Option<usize> {
        self.rows.iter().position(|(id, _)| id == identity)
    }

    pub fn get(&self, identity: &Value) -> Option<&Row> {
        self.rows
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, row)| row)
    }

    pub fn contains(&self, identity: &Value) -> bool {
        self.position(identity).is_some()
    }

    /// First row whose `column` equals `value`.
    pub fn find_by(&self, column: &str, value: &Value) -> Option<&Row> {
        if value.is_null() {
            return None;
        }
        self.rows
            .iter()
            .map(|(_, row)| row)
            .find(|row| row.get(column) == Some(value))
    }

    /// Next value of the table's sequence, skipping identities already taken.
    pub fn next_identity(&mut self) -> Value {
        loop {
            let candidate = Value::Integer(self.next_sequence);
            self.next_sequence += 1;
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn insert(&mut self, identity: Value, row: Row) -> Result<()> {
        if self.contains(&identity) {
            return Err(OrmError::ConstraintViolation(format!(
                "duplicate identity {} in table '{}'",
                identity, self.name
            )));
        }
        self.rows.push((identity, row));
        Ok(())
    }

    pub(crate) fn insert_at(&mut self, position: usize, identity: Value, row: Row) {
        let position = position.min(self.rows.len());
        self.rows.insert(position, (identity, row));
    }

    /// Replaces the row, returning the previous one.
    pub fn update(&mut self, identity: &Value, row: Row) -> Option<Row> {
        let position = self.position(identity)?;
        Some(std::mem::replace(&mut self.rows[position].1, row))
    }

    /// Removes the row, returning its position and content.
    pub fn delete(&mut self, identity: &Value) -> Option<(usize, Row)> {
        let position = self.position(identity)?;
        let (_, row) = self.rows.remove(position);
        Some((position, row))
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|(_, row)| row)
    }
}
