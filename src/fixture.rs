//! Fixture plumbing: CSV rows into typed [`FlatRow`]s.
//!
//! Header cells are field paths. `orderId` is a top-level field,
//! `customer.name` a member of a nested group, and `items[0].quantity` (or the
//! shorthand `items[].quantity`) a member of the first element of a list.
//! Each cell is typed from the scalar type the schema declares at its path;
//! empty cells are left absent.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use encoding_rs::Encoding;
use serde_json::{Number, Value};

use crate::{
    builder::{FlatRow, RowValue},
    io_utils,
    schema::{FieldKind, ScalarType, Schema},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

pub fn parse_header_path(header: &str) -> Result<Vec<PathSegment>> {
    let header = header.trim();
    if header.is_empty() {
        bail!("Empty column header");
    }
    header
        .split('.')
        .map(|part| {
            let part = part.trim();
            match part.find('[') {
                None if !part.is_empty() => Ok(PathSegment {
                    name: part.to_string(),
                    index: None,
                }),
                None => Err(anyhow!("Empty path segment in header '{header}'")),
                Some(open) => {
                    let name = &part[..open];
                    let index_text = part[open + 1..]
                        .strip_suffix(']')
                        .ok_or_else(|| anyhow!("Unclosed '[' in header '{header}'"))?;
                    if name.is_empty() {
                        bail!("Missing field name before '[' in header '{header}'");
                    }
                    let index = if index_text.trim().is_empty() {
                        0
                    } else {
                        index_text.trim().parse::<usize>().with_context(|| {
                            format!("Invalid list index '{index_text}' in header '{header}'")
                        })?
                    };
                    Ok(PathSegment {
                        name: name.to_string(),
                        index: Some(index),
                    })
                }
            }
        })
        .collect()
}

/// Parses a fixture cell as the given scalar type.
pub fn parse_scalar(raw: &str, ty: ScalarType) -> Result<Value> {
    let value = match ty {
        ScalarType::String | ScalarType::Bytes => Value::String(raw.to_string()),
        ScalarType::Int | ScalarType::Long => {
            let parsed: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{raw}' as integer"))?;
            Value::from(parsed)
        }
        ScalarType::Float | ScalarType::Double => {
            let parsed: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse '{raw}' as float"))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| anyhow!("'{raw}' is not a finite number"))?
        }
        ScalarType::Boolean => {
            let parsed = match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => true,
                "false" | "f" | "no" | "n" | "0" => false,
                _ => bail!("Failed to parse '{raw}' as boolean"),
            };
            Value::Bool(parsed)
        }
        ScalarType::Any => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
    };
    Ok(value)
}

/// Column layout resolved once per fixture file.
struct Column {
    header: String,
    path: Vec<PathSegment>,
    ty: Option<ScalarType>,
}

fn resolve_columns(headers: &[String], schema: &Schema) -> Result<Vec<Column>> {
    headers
        .iter()
        .map(|header| {
            let path = parse_header_path(header)?;
            let ty = match schema.resolve(path.iter().map(|s| s.name.as_str())) {
                Some(FieldKind::Scalar(ty)) => Some(*ty),
                Some(FieldKind::Array(element)) => match element.as_ref() {
                    FieldKind::Scalar(ty) if path.last().is_some_and(|s| s.index.is_some()) => {
                        Some(*ty)
                    }
                    _ => bail!("Column '{header}' does not address a scalar field"),
                },
                Some(FieldKind::Record(_)) => {
                    bail!("Column '{header}' addresses a record, not a scalar field")
                }
                None => None,
            };
            Ok(Column {
                header: header.clone(),
                path,
                ty,
            })
        })
        .collect()
}

/// Converts decoded fixture rows into flat rows typed against `schema`.
pub fn rows_from_table(
    headers: &[String],
    rows: &[Vec<String>],
    schema: &Schema,
) -> Result<Vec<FlatRow>> {
    let columns = resolve_columns(headers, schema)?;
    rows.iter()
        .enumerate()
        .map(|(row_idx, cells)| {
            let mut row = FlatRow::new();
            for (column, cell) in columns.iter().zip(cells) {
                if cell.is_empty() {
                    continue;
                }
                let value = match column.ty {
                    Some(ty) => parse_scalar(cell, ty).with_context(|| {
                        format!("Row {} column '{}'", row_idx + 2, column.header)
                    })?,
                    None => Value::String(cell.clone()),
                };
                place(&mut row, &column.path, value)
                    .with_context(|| format!("Row {} column '{}'", row_idx + 2, column.header))?;
            }
            prune_trailing_empty(&mut row);
            Ok(row)
        })
        .collect()
}

pub fn read_fixture(
    path: &Path,
    schema: &Schema,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<Vec<FlatRow>> {
    let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
    let (headers, rows) = io_utils::read_csv_table(path, delimiter, encoding)?;
    rows_from_table(&headers, &rows, schema).with_context(|| format!("Reading fixture {path:?}"))
}

fn place(row: &mut FlatRow, path: &[PathSegment], value: Value) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| anyhow!("Empty column path"))?;
    let mut current = row;
    for segment in parents {
        current = match segment.index {
            None => current
                .group_mut(&segment.name)
                .ok_or_else(|| anyhow!("'{}' is used both as a group and a value", segment.name))?,
            Some(idx) => match list_slot(current, &segment.name, idx)? {
                RowValue::Group(group) => group,
                _ => bail!("'{}[{idx}]' is used both as a group and a value", segment.name),
            },
        };
    }
    match last.index {
        None => current.insert(last.name.clone(), value),
        Some(idx) => *list_slot(current, &last.name, idx)? = RowValue::Scalar(value),
    }
    Ok(())
}

fn list_slot<'a>(row: &'a mut FlatRow, name: &str, idx: usize) -> Result<&'a mut RowValue> {
    if row.get(name).is_none() {
        row.insert(name, RowValue::List(Vec::new()));
    }
    match row.get_mut(name) {
        Some(RowValue::List(items)) => {
            while items.len() <= idx {
                items.push(RowValue::Group(FlatRow::new()));
            }
            Ok(&mut items[idx])
        }
        _ => bail!("'{name}' is used both as a list and a value"),
    }
}

/// Drops list elements left empty because every cell for them was blank.
fn prune_trailing_empty(row: &mut FlatRow) {
    let keys: Vec<String> = row.keys().map(str::to_string).collect();
    for key in keys {
        match row.get_mut(&key) {
            Some(RowValue::Group(group)) => prune_trailing_empty(group),
            Some(RowValue::List(items)) => {
                for item in items.iter_mut() {
                    if let RowValue::Group(group) = item {
                        prune_trailing_empty(group);
                    }
                }
                while matches!(items.last(), Some(RowValue::Group(g)) if g.is_empty()) {
                    items.pop();
                }
            }
            _ => {}
        }
    }
}

/// Appends `_<suffix>` to one string field of every row so repeated runs
/// against a shared table do not collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationSuffix {
    pub path: String,
    pub field: Vec<PathSegment>,
    pub suffix: String,
}

impl IsolationSuffix {
    pub fn new(field: &str, suffix: impl Into<String>) -> Result<Self> {
        Ok(IsolationSuffix {
            path: field.to_string(),
            field: parse_header_path(field)?,
            suffix: suffix.into(),
        })
    }

    /// Uses the current epoch milliseconds as the suffix.
    pub fn timestamped(field: &str) -> Result<Self> {
        Self::new(field, Utc::now().timestamp_millis().to_string())
    }

    /// Fails when the field is absent or does not hold a string.
    pub fn apply(&self, row: &mut FlatRow) -> Result<()> {
        let (last, parents) = self
            .field
            .split_last()
            .ok_or_else(|| anyhow!("Empty suffix field"))?;
        let mut current = row;
        for segment in parents {
            let value = current.get_mut(&segment.name);
            current = match (value, segment.index) {
                (Some(RowValue::Group(group)), None) => group,
                (Some(RowValue::List(items)), Some(index)) => match items.get_mut(index) {
                    Some(RowValue::Group(group)) => group,
                    _ => bail!("Suffix field '{}' has no element {index}", self.path),
                },
                _ => bail!(
                    "Suffix field '{}' does not resolve: '{}' is not a group",
                    self.path,
                    segment.name
                ),
            };
        }
        let leaf = match (current.get_mut(&last.name), last.index) {
            (Some(RowValue::List(items)), Some(index)) => items.get_mut(index),
            (value, None) => value,
            _ => None,
        };
        match leaf {
            Some(RowValue::Scalar(Value::String(text))) => {
                text.push('_');
                text.push_str(&self.suffix);
                Ok(())
            }
            Some(other) => bail!(
                "Suffix field '{}' must hold a string, found {other:?}",
                self.path
            ),
            None => bail!("Suffix field '{}' is missing", self.path),
        }
    }

    pub fn apply_all(&self, rows: &mut [FlatRow]) -> Result<()> {
        rows.iter_mut().enumerate().try_for_each(|(idx, row)| {
            self.apply(row).with_context(|| format!("Row {}", idx + 2))
        })
    }
}
