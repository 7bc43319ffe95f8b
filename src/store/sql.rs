// ============================================================================
// SQL Planning and Rendering
// ============================================================================
//
// A fetch of one group becomes a `SelectPlan`: the root table aliased `t0`
// plus one left outer join per join-fetched association, recursively for the
// joined targets' base groups. Recursion stops at `max_fetch_depth` and when
// the target entity already appears on the join path; such associations only
// carry the target identity.
//
// The plan renders to the SQL text that is logged and is executed directly
// against the in-memory tables.
//
// ============================================================================

use super::change::Row;
use super::table::Table;
use crate::core::{OrmError, Result, Value};
use crate::metadata::{EntityDescriptor, FetchGroup, Metamodel};
use crate::session::{EntityRow, Joined, WriteRequest};
use chrono::Utc;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOn {
    /// `target.identity = owner.column`
    OwnerForeignKey { column: String },
    /// `target.column = owner.identity`
    TargetForeignKey { column: String },
}

#[derive(Debug, Clone)]
pub enum JoinTarget {
    Row(Box<Projection>),
    /// Only the target identity is read. `alias` is set when a join is
    /// needed to find it.
    Reference {
        table: String,
        alias: Option<String>,
        identity_column: String,
    },
}

impl JoinTarget {
    fn table(&self) -> &str {
        match self {
            JoinTarget::Row(projection) => &projection.table,
            JoinTarget::Reference { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinProjection {
    pub attribute: String,
    pub on: JoinOn,
    pub target: JoinTarget,
}

/// Columns read for one entity of the plan.
#[derive(Debug, Clone)]
pub struct Projection {
    pub entity: String,
    pub table: String,
    pub alias: String,
    pub identity_column: String,
    /// Attribute name and column of every value read from this table
    pub values: Vec<(String, String)>,
    pub joins: Vec<JoinProjection>,
    columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JoinClause {
    table: String,
    alias: String,
    left: (String, String),
    right: (String, String),
}

#[derive(Debug, Clone)]
pub struct SelectPlan {
    root: Projection,
    joins: Vec<JoinClause>,
}

impl SelectPlan {
    pub fn build(
        metamodel: &Metamodel,
        entity: &EntityDescriptor,
        group: &FetchGroup,
        max_depth: usize,
    ) -> Result<Self> {
        let mut planner = Planner {
            metamodel,
            max_depth,
            next_alias: 1,
            joins: Vec::new(),
            path: Vec::new(),
        };
        let root = planner.project(entity, group.attributes(), "t0".to_string(), 0)?;
        Ok(Self {
            root,
            joins: planner.joins,
        })
    }

    pub fn root(&self) -> &Projection {
        &self.root
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    pub fn to_sql(&self) -> String {
        let mut columns = Vec::new();
        collect_columns(&self.root, &mut columns);

        let mut sql = format!(
            "select {} from {} {}",
            columns.join(", "),
            self.root.table,
            self.root.alias
        );
        for join in &self.joins {
            sql.push_str(&format!(
                " left outer join {} {} on {}.{} = {}.{}",
                join.table, join.alias, join.left.0, join.left.1, join.right.0, join.right.1
            ));
        }
        sql.push_str(&format!(
            " where {}.{} = ?",
            self.root.alias, self.root.identity_column
        ));
        sql
    }

    pub fn execute(&self, tables: &HashMap<String, Table>, identity: &Value) -> Result<Option<EntityRow>> {
        let table = table(tables, &self.root.table)?;
        match table.get(identity) {
            Some(row) => assemble(&self.root, row, tables).map(Some),
            None => Ok(None),
        }
    }
}

struct Planner<'a> {
    metamodel: &'a Metamodel,
    max_depth: usize,
    next_alias: usize,
    joins: Vec<JoinClause>,
    path: Vec<String>,
}

impl Planner<'_> {
    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn join(&mut self, target: &EntityDescriptor, alias: &str, on: &JoinOn, owner: &Projection) {
        let target_identity = target.identity().column().to_string();
        let (left, right) = match on {
            JoinOn::OwnerForeignKey { column } => (
                (alias.to_string(), target_identity),
                (owner.alias.clone(), column.clone()),
            ),
            JoinOn::TargetForeignKey { column } => (
                (alias.to_string(), column.clone()),
                (owner.alias.clone(), owner.identity_column.clone()),
            ),
        };
        self.joins.push(JoinClause {
            table: target.table().to_string(),
            alias: alias.to_string(),
            left,
            right,
        });
    }

    fn project(
        &mut self,
        entity: &EntityDescriptor,
        attributes: &[usize],
        alias: String,
        depth: usize,
    ) -> Result<Projection> {
        let identity_column = entity.identity().column().to_string();
        let mut projection = Projection {
            entity: entity.name().to_string(),
            table: entity.table().to_string(),
            columns: vec![format!("{}.{}", alias, identity_column)],
            alias,
            identity_column,
            values: Vec::new(),
            joins: Vec::new(),
        };

        self.path.push(entity.name().to_string());
        for &idx in attributes {
            let attr = entity.attribute_at(idx)?;
            let association = match attr.association() {
                Some(association) if association.is_join_fetched() => association,
                _ => {
                    projection
                        .columns
                        .push(format!("{}.{}", projection.alias, attr.column()));
                    projection
                        .values
                        .push((attr.name().to_string(), attr.column().to_string()));
                    continue;
                }
            };

            let target = self.metamodel.entity(&association.target)?;
            let on = match &association.mapped_by {
                Some(mapped_by) => JoinOn::TargetForeignKey {
                    column: target.attribute(mapped_by)?.column().to_string(),
                },
                None => {
                    projection
                        .columns
                        .push(format!("{}.{}", projection.alias, attr.column()));
                    JoinOn::OwnerForeignKey {
                        column: attr.column().to_string(),
                    }
                }
            };

            let stop = depth + 1 > self.max_depth || self.path.iter().any(|p| p == target.name());
            let join_target = if stop {
                let alias = match on {
                    JoinOn::OwnerForeignKey { .. } => None,
                    JoinOn::TargetForeignKey { .. } => {
                        let alias = self.alias();
                        self.join(target, &alias, &on, &projection);
                        Some(alias)
                    }
                };
                JoinTarget::Reference {
                    table: target.table().to_string(),
                    alias,
                    identity_column: target.identity().column().to_string(),
                }
            } else {
                let alias = self.alias();
                self.join(target, &alias, &on, &projection);
                let child = self.project(target, target.base_group().attributes(), alias, depth + 1)?;
                JoinTarget::Row(Box::new(child))
            };

            projection.joins.push(JoinProjection {
                attribute: attr.name().to_string(),
                on,
                target: join_target,
            });
        }
        self.path.pop();

        Ok(projection)
    }
}

fn collect_columns(projection: &Projection, columns: &mut Vec<String>) {
    columns.extend(projection.columns.iter().cloned());
    for join in &projection.joins {
        match &join.target {
            JoinTarget::Row(child) => collect_columns(child, columns),
            JoinTarget::Reference {
                alias: Some(alias),
                identity_column,
                ..
            } => columns.push(format!("{}.{}", alias, identity_column)),
            JoinTarget::Reference { alias: None, .. } => {}
        }
    }
}

fn table<'a>(tables: &'a HashMap<String, Table>, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| OrmError::ExecutionError(format!("table '{}' does not exist", name)))
}

fn assemble(projection: &Projection, row: &Row, tables: &HashMap<String, Table>) -> Result<EntityRow> {
    let column = |name: &str| row.get(name).cloned().unwrap_or(Value::Null);
    let identity = column(&projection.identity_column);
    let mut out = EntityRow::new(projection.entity.clone(), identity.clone());

    for (attribute, name) in &projection.values {
        out.values.push((attribute.clone(), column(name)));
    }

    for join in &projection.joins {
        let target_table = table(tables, join.target.table())?;
        let target_row = match &join.on {
            JoinOn::OwnerForeignKey { column: fk } => match row.get(fk) {
                Some(value) if !value.is_null() => target_table.get(value),
                _ => None,
            },
            JoinOn::TargetForeignKey { column: fk } => target_table.find_by(fk, &identity),
        };

        let joined = match (target_row, &join.target) {
            (None, _) => Joined::Absent,
            (Some(target_row), JoinTarget::Row(child)) => {
                Joined::Row(Box::new(assemble(child, target_row, tables)?))
            }
            (Some(target_row), JoinTarget::Reference { identity_column, .. }) => Joined::Reference(
                target_row.get(identity_column).cloned().unwrap_or(Value::Null),
            ),
        };
        out.joined.push((join.attribute.clone(), joined));
    }

    Ok(out)
}

/// Column names and rendered value expressions of an insert or update.
pub(crate) fn write_columns(request: &WriteRequest<'_>) -> Result<Vec<(String, String)>> {
    let mut columns = Vec::with_capacity(request.values.len() + request.generated.len());
    for (name, _) in &request.values {
        columns.push((request.entity.attribute(name)?.column().to_string(), "?".to_string()));
    }
    for (name, expression) in &request.generated {
        columns.push((request.entity.attribute(name)?.column().to_string(), expression.clone()));
    }
    Ok(columns)
}

pub fn render_insert(request: &WriteRequest<'_>) -> Result<String> {
    let mut columns = vec![request.entity.identity().column().to_string()];
    let mut values = vec!["?".to_string()];
    for (column, value) in write_columns(request)? {
        columns.push(column);
        values.push(value);
    }
    Ok(format!(
        "insert into {} ({}) values ({})",
        request.entity.table(),
        columns.join(", "),
        values.join(", ")
    ))
}

pub fn render_update(request: &WriteRequest<'_>) -> Result<String> {
    let assignments: Vec<String> = write_columns(request)?
        .into_iter()
        .map(|(column, value)| format!("{} = {}", column, value))
        .collect();
    Ok(format!(
        "update {} set {} where {} = ?",
        request.entity.table(),
        assignments.join(", "),
        request.entity.identity().column()
    ))
}

pub fn render_delete(entity: &EntityDescriptor) -> String {
    format!(
        "delete from {} where {} = ?",
        entity.table(),
        entity.identity().column()
    )
}

/// Evaluates the SQL expression of a database-generated column.
pub fn evaluate_expression(expression: &str) -> Result<Value> {
    let trimmed = expression.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "current_timestamp" | "current_timestamp()" | "localtimestamp" | "now()" => {
            return Ok(Value::Timestamp(Utc::now()));
        }
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Boolean(true)),
        "false" => return Ok(Value::Boolean(false)),
        _ => {}
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return Ok(Value::Text(inner.replace("''", "'")));
    }

    Err(OrmError::UnsupportedOperation(format!(
        "database expression '{}'",
        expression
    )))
}
