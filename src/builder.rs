//! Schema-driven record building.
//!
//! [`build`] turns one [`FlatRow`] into a [`Record`] whose keys are exactly
//! the schema's fields, in schema order. The schema drives the walk, so a
//! field added to the schema participates without any per-field code.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{ReconcileError, Result},
    schema::{FieldKind, Schema},
};

/// One cell of a flat fixture row: a scalar, a nested group, or a list of either.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Scalar(Value),
    Group(FlatRow),
    List(Vec<RowValue>),
}

impl RowValue {
    fn describe(&self) -> &'static str {
        match self {
            RowValue::Scalar(_) => "scalar",
            RowValue::Group(_) => "group",
            RowValue::List(_) => "list",
        }
    }
}

impl From<Value> for RowValue {
    fn from(value: Value) -> Self {
        RowValue::Scalar(value)
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::Scalar(Value::String(value.to_string()))
    }
}

impl From<FlatRow> for RowValue {
    fn from(row: FlatRow) -> Self {
        RowValue::Group(row)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    cells: BTreeMap<String, RowValue>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<RowValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RowValue>) {
        self.cells.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&RowValue> {
        self.cells.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut RowValue> {
        self.cells.get_mut(key)
    }

    /// Returns the nested group stored under `key`, creating an empty one when absent.
    pub fn group_mut(&mut self, key: &str) -> Option<&mut FlatRow> {
        let entry = self
            .cells
            .entry(key.to_string())
            .or_insert_with(|| RowValue::Group(FlatRow::new()));
        match entry {
            RowValue::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A nested document conforming to the schema it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_document(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_document(self) -> Value {
        Value::Object(self.fields)
    }
}

pub fn build(row: &FlatRow, schema: &Schema) -> Result<Record> {
    let fields = build_object(row, schema, "")?;
    Ok(Record { fields })
}

pub fn build_all(rows: &[FlatRow], schema: &Schema) -> Result<Vec<Record>> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            build(row, schema).map_err(|err| match err {
                ReconcileError::SchemaMismatch { path, message } => {
                    ReconcileError::schema_mismatch(path, format!("row {idx}: {message}"))
                }
                other => other,
            })
        })
        .collect()
}

fn build_object(row: &FlatRow, schema: &Schema, prefix: &str) -> Result<Map<String, Value>> {
    for key in row.keys() {
        if schema.field(key).is_some() {
            continue;
        }
        let path = join_path(prefix, key);
        match row.get(key) {
            Some(cell @ (RowValue::Group(_) | RowValue::List(_))) => {
                return Err(ReconcileError::schema_mismatch(
                    path,
                    format!(
                        "row supplies a nested {} that schema '{}' does not declare",
                        cell.describe(),
                        schema.name
                    ),
                ));
            }
            _ => debug!("Ignoring undeclared field '{path}'"),
        }
    }

    let mut fields = Map::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let path = join_path(prefix, &field.name);
        let value = match row.get(&field.name) {
            None => Value::Null,
            Some(cell) => build_value(cell, &field.kind, &path)?,
        };
        fields.insert(field.name.clone(), value);
    }
    Ok(fields)
}

fn build_value(cell: &RowValue, kind: &FieldKind, path: &str) -> Result<Value> {
    match (kind, cell) {
        (FieldKind::Scalar(_), RowValue::Scalar(value)) => Ok(value.clone()),
        (FieldKind::Record(_), RowValue::Scalar(Value::Null))
        | (FieldKind::Array(_), RowValue::Scalar(Value::Null)) => Ok(Value::Null),
        (FieldKind::Record(sub), RowValue::Group(group)) => {
            Ok(Value::Object(build_object(group, sub, path)?))
        }
        (FieldKind::Array(element), RowValue::List(entries)) => entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| build_value(entry, element, &format!("{path}[{idx}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (kind, cell) => Err(ReconcileError::schema_mismatch(
            path,
            format!(
                "schema declares {} but row supplies a {}",
                kind.describe(),
                cell.describe()
            ),
        )),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
