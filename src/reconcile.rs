//! Round-trip orchestration.
//!
//! A [`Reconciler`] builds records from fixture rows, renames their keys into
//! the store's convention, inserts them, waits for them to become queryable,
//! pairs every retrieved document with its source record, and validates each
//! pair against the mapping table.
//!
//! Retrieved documents are paired by a [`MatchKey`] when one is configured,
//! so the test does not depend on the store returning rows in insertion order.
//! Without a key, pairing is positional.

use std::{
    collections::HashMap,
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    builder::{FlatRow, build_all},
    error::{ReconcileError, Result},
    mapping::FieldMappingTable,
    naming::{NamingRule, transcode},
    schema::Schema,
    store::{InsertReport, Predicate, RecordStore},
    validate::{ValidationReport, Validator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Wait after the insert before the first query.
    pub settle_delay: Duration,
    /// Total time allowed for the inserted rows to become queryable.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            settle_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl StoreOptions {
    pub fn immediate() -> Self {
        StoreOptions {
            settle_delay: Duration::ZERO,
            timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Identifier field used to pair retrieved documents with source records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub source: String,
    pub target: String,
}

impl MatchKey {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        MatchKey {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Key whose target name is the source name under `rule`.
    pub fn renamed(source: &str, rule: NamingRule) -> Self {
        MatchKey::new(source, rule.apply(source).into_owned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub rule: NamingRule,
    pub validator: Validator,
    pub store: StoreOptions,
    pub match_key: Option<MatchKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub index: usize,
    pub key: Option<Value>,
    /// `None` when no retrieved document could be paired with the record.
    pub report: Option<ValidationReport>,
}

impl RecordOutcome {
    pub fn passed(&self) -> bool {
        self.report.as_ref().is_some_and(ValidationReport::passed)
    }

    pub fn label(&self) -> String {
        match &self.key {
            Some(Value::String(key)) => key.clone(),
            Some(other) => other.to_string(),
            None => format!("record {}", self.index),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub insert: InsertReport,
    pub records: Vec<RecordOutcome>,
}

impl ReconcileReport {
    pub fn passed(&self) -> bool {
        self.records.iter().all(RecordOutcome::passed)
    }

    pub fn failure_count(&self) -> usize {
        self.records
            .iter()
            .map(|outcome| match &outcome.report {
                Some(report) => report.failure_count(),
                None => 1,
            })
            .sum()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            return Ok(self);
        }
        let first = self
            .records
            .iter()
            .find(|outcome| !outcome.passed())
            .map(|outcome| match &outcome.report {
                Some(report) => format!(
                    "{}: {}",
                    outcome.label(),
                    report
                        .failures()
                        .next()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                ),
                None => format!("{}: not retrieved", outcome.label()),
            })
            .unwrap_or_default();
        Err(ReconcileError::ValidationMismatch {
            failures: self.failure_count(),
            first,
        })
    }
}

pub struct Reconciler<'a, S: RecordStore> {
    schema: &'a Schema,
    table: &'a FieldMappingTable,
    store: &'a mut S,
    options: ReconcileOptions,
}

impl<'a, S: RecordStore> Reconciler<'a, S> {
    pub fn new(
        schema: &'a Schema,
        table: &'a FieldMappingTable,
        store: &'a mut S,
        options: ReconcileOptions,
    ) -> Self {
        Reconciler {
            schema,
            table,
            store,
            options,
        }
    }

    pub fn run(&mut self, target: &str, rows: &[FlatRow]) -> Result<ReconcileReport> {
        if !self.store.table_exists(target)? {
            return Err(ReconcileError::store(target, "table does not exist"));
        }
        let sources = prepare_sources(rows, self.schema)?;
        let stored = sources
            .iter()
            .map(|doc| transcode(doc, self.options.rule))
            .collect::<Result<Vec<_>>>()?;

        info!("Inserting {} record(s) into {target}", stored.len());
        let insert = self.store.insert(target, &stored)?.into_result(target)?;

        if !self.options.store.settle_delay.is_zero() {
            debug!(
                "Waiting {:?} for inserted rows to settle",
                self.options.store.settle_delay
            );
            thread::sleep(self.options.store.settle_delay);
        }

        let predicate = self.predicate_for(&sources);
        let retrieved = self.poll(target, &predicate, sources.len())?;
        info!("Retrieved {} document(s) from {target}", retrieved.len());
        if self.options.match_key.is_none() && retrieved.len() > sources.len() {
            return Err(ReconcileError::store(
                target,
                format!(
                    "table holds {} row(s) but only {} were inserted; \
                     set a match key to scope the query to this run",
                    retrieved.len(),
                    sources.len()
                ),
            ));
        }

        let records = pair_and_validate(
            &sources,
            retrieved,
            self.table,
            &self.options.validator,
            self.options.match_key.as_ref(),
        )?;
        Ok(ReconcileReport { insert, records })
    }

    fn predicate_for(&self, sources: &[Value]) -> Predicate {
        match &self.options.match_key {
            Some(key) => {
                let values = sources
                    .iter()
                    .filter_map(|doc| doc.get(&key.source).cloned())
                    .collect();
                Predicate::field_in(key.target.clone(), values).ordered_by(key.target.clone())
            }
            None => Predicate::all(),
        }
    }

    fn poll(&self, target: &str, predicate: &Predicate, expected: usize) -> Result<Vec<Value>> {
        let started = Instant::now();
        loop {
            let rows = self.store.query(target, predicate)?;
            if rows.len() >= expected {
                return Ok(rows);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.options.store.timeout {
                return Err(ReconcileError::store(
                    target,
                    format!(
                        "timed out after {elapsed:?}: {} of {expected} row(s) visible",
                        rows.len()
                    ),
                ));
            }
            debug!("{} of {expected} row(s) visible; polling again", rows.len());
            thread::sleep(self.options.store.poll_interval);
        }
    }
}

/// Builds the source documents for a batch of fixture rows.
pub fn prepare_sources(rows: &[FlatRow], schema: &Schema) -> Result<Vec<Value>> {
    Ok(build_all(rows, schema)?
        .into_iter()
        .map(|record| record.into_document())
        .collect())
}

/// Pairs retrieved documents with their sources and validates each pair.
pub fn pair_and_validate(
    sources: &[Value],
    retrieved: Vec<Value>,
    table: &FieldMappingTable,
    validator: &Validator,
    match_key: Option<&MatchKey>,
) -> Result<Vec<RecordOutcome>> {
    let paired = match match_key {
        Some(key) => pair_by_key(sources, retrieved, key)?,
        None => {
            if retrieved.len() != sources.len() {
                warn!(
                    "Pairing {} source record(s) positionally with {} retrieved document(s)",
                    sources.len(),
                    retrieved.len()
                );
            }
            let mut retrieved = retrieved.into_iter();
            sources.iter().map(|_| retrieved.next()).collect()
        }
    };

    sources
        .iter()
        .zip(paired)
        .enumerate()
        .map(|(index, (source, target))| {
            let key = match_key.and_then(|k| source.get(&k.source).cloned());
            let report = match target {
                Some(target) => Some(validator.validate(source, &target, table)?),
                None => {
                    warn!("No retrieved document for record {index}");
                    None
                }
            };
            Ok(RecordOutcome { index, key, report })
        })
        .collect()
}

fn pair_by_key(
    sources: &[Value],
    retrieved: Vec<Value>,
    key: &MatchKey,
) -> Result<Vec<Option<Value>>> {
    let mut by_key: HashMap<String, Value> = HashMap::with_capacity(retrieved.len());
    for doc in retrieved {
        let Some(value) = doc.get(&key.target).filter(|v| !v.is_null()) else {
            return Err(ReconcileError::mapping(format!(
                "retrieved document has no match key '{}'",
                key.target
            )));
        };
        let id = key_id(value);
        if by_key.insert(id.clone(), doc).is_some() {
            return Err(ReconcileError::store(
                key.target.as_str(),
                format!("more than one retrieved document has key {id}"),
            ));
        }
    }
    sources
        .iter()
        .map(|source| {
            let value = source
                .get(&key.source)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    ReconcileError::mapping(format!(
                        "source record has no match key '{}'",
                        key.source
                    ))
                })?;
            Ok(by_key.remove(&key_id(value)))
        })
        .collect()
}

/// Map key for a match value. Integral floats share the integer's form, so
/// `1` and `1.0` pair.
fn key_id(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
