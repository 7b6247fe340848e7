//! Request/response boundary to the storage system under test.
//!
//! The reconciliation core only needs three operations from a store: insert a
//! batch of documents, query documents back, and check that a table exists.
//! [`MemoryStore`] keeps tables in process and [`JsonDirStore`] keeps one
//! newline-delimited JSON file per table in a directory.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde_json::Value;

use crate::{
    compare::compare,
    error::{ReconcileError, Result},
};

/// A `dataset.table` (optionally `project.dataset.table`) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn parse(target: &str) -> Result<Self> {
        let parts: Vec<&str> = target.trim().split('.').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ReconcileError::store(
                target,
                "expected 'dataset.table' or 'project.dataset.table'",
            ));
        }
        match parts.as_slice() {
            [dataset, table] => Ok(TableRef {
                project: None,
                dataset: dataset.to_string(),
                table: table.to_string(),
            }),
            [project, dataset, table] => Ok(TableRef {
                project: Some(project.to_string()),
                dataset: dataset.to_string(),
                table: table.to_string(),
            }),
            _ => Err(ReconcileError::store(
                target,
                "expected 'dataset.table' or 'project.dataset.table'",
            )),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{project}.")?;
        }
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Per-row outcome of an insert. Rows are keyed by their index in the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub attempted: usize,
    row_errors: BTreeMap<usize, Vec<String>>,
}

impl InsertReport {
    pub fn new(attempted: usize) -> Self {
        InsertReport {
            attempted,
            row_errors: BTreeMap::new(),
        }
    }

    pub fn record_error(&mut self, row: usize, message: impl Into<String>) {
        self.row_errors.entry(row).or_default().push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.row_errors.is_empty()
    }

    pub fn inserted(&self) -> usize {
        self.attempted - self.row_errors.len()
    }

    pub fn errors_for(&self, row: usize) -> &[String] {
        self.row_errors.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_errors(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.row_errors.iter().map(|(row, errs)| (*row, errs.as_slice()))
    }

    /// Turns any per-row failure into a store error for `target`.
    pub fn into_result(self, target: &str) -> Result<Self> {
        if let Some((row, errors)) = self.row_errors.iter().next() {
            return Err(ReconcileError::store(
                target,
                format!(
                    "{} of {} row(s) rejected; row {row}: {}",
                    self.row_errors.len(),
                    self.attempted,
                    errors.join("; ")
                ),
            ));
        }
        Ok(self)
    }
}

/// Row filter for queries: `field IN (one_of…) ORDER BY order_by`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub field: Option<String>,
    pub one_of: Vec<Value>,
    pub order_by: Option<String>,
}

impl Predicate {
    pub fn all() -> Self {
        Predicate::default()
    }

    pub fn field_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate {
            field: Some(field.into()),
            one_of: values,
            order_by: None,
        }
    }

    pub fn ordered_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match &self.field {
            None => true,
            Some(field) => {
                let candidate = doc.get(field);
                self.one_of.iter().any(|v| compare(Some(v), candidate))
            }
        }
    }

    /// Applies the filter and ordering to rows in their natural order.
    pub fn apply<'a, I>(&self, rows: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut selected: Vec<Value> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();
        if let Some(key) = &self.order_by {
            selected.sort_by(|a, b| order_values(a.get(key), b.get(key)));
        }
        selected
    }
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

pub trait RecordStore {
    fn insert(&mut self, target: &str, records: &[Value]) -> Result<InsertReport>;

    fn query(&self, target: &str, predicate: &Predicate) -> Result<Vec<Value>>;

    fn table_exists(&self, target: &str) -> Result<bool>;
}

fn check_row(row: &Value, required: &[String], report: &mut InsertReport, idx: usize) -> bool {
    let Some(map) = row.as_object() else {
        report.record_error(idx, "row is not a JSON object");
        return false;
    };
    let mut ok = true;
    for column in required {
        if map.get(column).is_none_or(Value::is_null) {
            report.record_error(idx, format!("required column '{column}' is missing"));
            ok = false;
        }
    }
    ok
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    required: Vec<String>,
    rows: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<TableRef, MemoryTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a table whose rows must carry non-null `required` columns.
    pub fn create_table(&mut self, target: &str, required: &[&str]) -> Result<()> {
        let table = TableRef::parse(target)?;
        self.tables.insert(
            table,
            MemoryTable {
                required: required.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Direct access to stored rows, for simulating store-side rewrites.
    pub fn rows_mut(&mut self, target: &str) -> Result<&mut Vec<Value>> {
        let table = TableRef::parse(target)?;
        self.tables
            .get_mut(&table)
            .map(|t| &mut t.rows)
            .ok_or_else(|| ReconcileError::store(target, "table not found"))
    }
}

impl RecordStore for MemoryStore {
    fn insert(&mut self, target: &str, records: &[Value]) -> Result<InsertReport> {
        let table = TableRef::parse(target)?;
        let entry = self
            .tables
            .get_mut(&table)
            .ok_or_else(|| ReconcileError::store(target, "table not found"))?;
        let mut report = InsertReport::new(records.len());
        for (idx, row) in records.iter().enumerate() {
            if check_row(row, &entry.required, &mut report, idx) {
                entry.rows.push(row.clone());
            }
        }
        debug!(
            "Inserted {} of {} row(s) into {table}",
            report.inserted(),
            report.attempted
        );
        Ok(report)
    }

    fn query(&self, target: &str, predicate: &Predicate) -> Result<Vec<Value>> {
        let table = TableRef::parse(target)?;
        let entry = self
            .tables
            .get(&table)
            .ok_or_else(|| ReconcileError::store(target, "table not found"))?;
        Ok(predicate.apply(&entry.rows))
    }

    fn table_exists(&self, target: &str) -> Result<bool> {
        Ok(self.tables.contains_key(&TableRef::parse(target)?))
    }
}

/// Stores each table as `<root>/<table ref>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| ReconcileError::io(&root, err))?;
        Ok(JsonDirStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, target: &str) -> Result<PathBuf> {
        let table = TableRef::parse(target)?;
        Ok(self.root.join(format!("{table}.jsonl")))
    }

    pub fn create_table(&self, target: &str) -> Result<()> {
        let path = self.table_path(target)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| ReconcileError::io(&path, err))?;
        Ok(())
    }

    fn existing_path(&self, target: &str) -> Result<PathBuf> {
        let path = self.table_path(target)?;
        if !path.exists() {
            return Err(ReconcileError::store(target, "table not found"));
        }
        Ok(path)
    }
}

impl RecordStore for JsonDirStore {
    fn insert(&mut self, target: &str, records: &[Value]) -> Result<InsertReport> {
        let path = self.existing_path(target)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|err| ReconcileError::io(&path, err))?;
        let mut report = InsertReport::new(records.len());
        for (idx, row) in records.iter().enumerate() {
            if !check_row(row, &[], &mut report, idx) {
                continue;
            }
            let line = serde_json::to_string(row)?;
            writeln!(file, "{line}").map_err(|err| ReconcileError::io(&path, err))?;
        }
        file.flush().map_err(|err| ReconcileError::io(&path, err))?;
        Ok(report)
    }

    fn query(&self, target: &str, predicate: &Predicate) -> Result<Vec<Value>> {
        let path = self.existing_path(target)?;
        let file = fs::File::open(&path).map_err(|err| ReconcileError::io(&path, err))?;
        let mut rows = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| ReconcileError::io(&path, err))?;
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str::<Value>(&line).map_err(|err| {
                ReconcileError::store(target, format!("line {}: {err}", idx + 1))
            })?;
            rows.push(value);
        }
        Ok(predicate.apply(&rows))
    }

    fn table_exists(&self, target: &str) -> Result<bool> {
        Ok(self.table_path(target)?.exists())
    }
}
