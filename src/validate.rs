//! Mapping-driven validation of a retrieved document against its source.
//!
//! The validator interprets a [`FieldMappingTable`] scope by scope. Plain
//! field pairs of a scope are checked before its nested scopes, and every
//! check becomes an [`Assertion`] in the [`ValidationReport`]; nothing short
//! circuits except the array length gate, which skips element inspection for
//! that one container.

use std::fmt;

use log::debug;
use serde_json::{Map, Value};

use crate::{
    compare::Comparator,
    error::{ReconcileError, Result},
    mapping::{FieldMappingTable, MappingEntry, Scope, ScopeKind, fields_of, scopes_of},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    ValueDiffers,
    PresenceDiffers,
    LengthDiffers { expected: usize, actual: usize },
    ShapeDiffers,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::ValueDiffers => f.write_str("value differs"),
            MismatchReason::PresenceDiffers => f.write_str("presence differs"),
            MismatchReason::LengthDiffers { expected, actual } => {
                write!(f, "array length differs ({expected} != {actual})")
            }
            MismatchReason::ShapeDiffers => f.write_str("shape differs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(MismatchReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// Source-side path, e.g. `items[0].quantity`.
    pub path: String,
    pub source_key: String,
    pub target_key: String,
    pub expected: Value,
    pub actual: Value,
    pub outcome: Outcome,
}

impl Assertion {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    pub fn reason(&self) -> Option<&MismatchReason> {
        match &self.outcome {
            Outcome::Passed => None,
            Outcome::Failed(reason) => Some(reason),
        }
    }

    pub fn is_renamed(&self) -> bool {
        self.source_key != self.target_key
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if self.is_renamed() {
            write!(f, " -> {}", self.target_key)?;
        }
        match &self.outcome {
            Outcome::Passed => write!(f, ": PASS")?,
            Outcome::Failed(reason) => write!(f, ": FAIL ({reason})")?,
        }
        write!(f, " | expected: {} | actual: {}", self.expected, self.actual)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    assertions: Vec<Assertion>,
}

impl ValidationReport {
    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    pub fn passed(&self) -> bool {
        self.assertions.iter().all(Assertion::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|a| !a.passed())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn find(&self, path: &str) -> Option<&Assertion> {
        self.assertions.iter().find(|a| a.path == path)
    }

    pub fn into_result(self) -> Result<ValidationReport> {
        let failures = self.failure_count();
        let first = self.failures().next().map(ToString::to_string);
        match first {
            Some(first) => Err(ReconcileError::ValidationMismatch { failures, first }),
            None => Ok(self),
        }
    }

    fn push(&mut self, assertion: Assertion) {
        debug!("{assertion}");
        self.assertions.push(assertion);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    comparator: Comparator,
}

impl Validator {
    pub fn new(comparator: Comparator) -> Self {
        Validator { comparator }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn validate(
        &self,
        source: &Value,
        target: &Value,
        table: &FieldMappingTable,
    ) -> Result<ValidationReport> {
        let source = source.as_object().ok_or_else(|| {
            ReconcileError::mapping_in_scope("root", "source document is not an object")
        })?;
        let target = target.as_object().ok_or_else(|| {
            ReconcileError::mapping_in_scope("root", "target document is not an object")
        })?;
        let mut report = ValidationReport::default();
        self.walk(table.entries(), source, target, "root", "", &mut report)?;
        Ok(report)
    }

    fn walk(
        &self,
        entries: &[MappingEntry],
        source: &Map<String, Value>,
        target: &Map<String, Value>,
        scope: &str,
        prefix: &str,
        report: &mut ValidationReport,
    ) -> Result<()> {
        for pair in fields_of(entries) {
            let expected = source.get(&pair.source);
            let actual = target.get(&pair.target);
            if expected.is_none() && actual.is_none() {
                return Err(ReconcileError::mapping_in_scope(
                    scope,
                    format!(
                        "field '{}' -> '{}' is absent from both documents",
                        pair.source, pair.target
                    ),
                ));
            }
            let path = join_path(prefix, &pair.source);
            let outcome = if self.comparator.compare_at(expected, actual, &path) {
                Outcome::Passed
            } else if is_null(expected) != is_null(actual) {
                Outcome::Failed(MismatchReason::PresenceDiffers)
            } else {
                Outcome::Failed(MismatchReason::ValueDiffers)
            };
            report.push(Assertion {
                path,
                source_key: pair.source.clone(),
                target_key: pair.target.clone(),
                expected: expected.cloned().unwrap_or(Value::Null),
                actual: actual.cloned().unwrap_or(Value::Null),
                outcome,
            });
        }
        for nested in scopes_of(entries) {
            self.walk_scope(nested, source, target, scope, prefix, report)?;
        }
        Ok(())
    }

    fn walk_scope(
        &self,
        scope: &Scope,
        source: &Map<String, Value>,
        target: &Map<String, Value>,
        parent: &str,
        prefix: &str,
        report: &mut ValidationReport,
    ) -> Result<()> {
        let raw_source = source.get(&scope.source);
        let raw_target = target.get(&scope.target);
        if raw_source.is_none() && raw_target.is_none() {
            return Err(ReconcileError::mapping_in_scope(
                parent,
                format!(
                    "scope container '{}' -> '{}' is absent from both documents",
                    scope.source, scope.target
                ),
            ));
        }
        let path = join_path(prefix, &scope.source);
        let container = |outcome: Outcome| Assertion {
            path: path.clone(),
            source_key: scope.source.clone(),
            target_key: scope.target.clone(),
            expected: summarize(raw_source),
            actual: summarize(raw_target),
            outcome,
        };

        let (expected, actual) = match (non_null(raw_source), non_null(raw_target)) {
            (None, None) => {
                report.push(container(Outcome::Passed));
                return Ok(());
            }
            (Some(_), None) | (None, Some(_)) => {
                report.push(container(Outcome::Failed(MismatchReason::PresenceDiffers)));
                return Ok(());
            }
            (Some(expected), Some(actual)) => (expected, actual),
        };

        match scope.kind {
            ScopeKind::Object => {
                let expected = expected.as_object().ok_or_else(|| {
                    ReconcileError::mapping_in_scope(
                        scope.source.as_str(),
                        format!("object scope but source '{path}' is not an object"),
                    )
                })?;
                let Some(actual) = actual.as_object() else {
                    report.push(container(Outcome::Failed(MismatchReason::ShapeDiffers)));
                    return Ok(());
                };
                report.push(container(Outcome::Passed));
                self.walk(&scope.entries, expected, actual, &scope.source, &path, report)
            }
            ScopeKind::Array => {
                let expected = expected.as_array().ok_or_else(|| {
                    ReconcileError::mapping_in_scope(
                        scope.source.as_str(),
                        format!("array scope but source '{path}' is not an array"),
                    )
                })?;
                let Some(actual) = actual.as_array() else {
                    report.push(container(Outcome::Failed(MismatchReason::ShapeDiffers)));
                    return Ok(());
                };
                if expected.len() != actual.len() {
                    report.push(container(Outcome::Failed(MismatchReason::LengthDiffers {
                        expected: expected.len(),
                        actual: actual.len(),
                    })));
                    return Ok(());
                }
                report.push(container(Outcome::Passed));
                for (idx, (expected_item, actual_item)) in expected.iter().zip(actual).enumerate() {
                    let item_path = format!("{path}[{idx}]");
                    let expected_map = expected_item.as_object().ok_or_else(|| {
                        ReconcileError::mapping_in_scope(
                            scope.source.as_str(),
                            format!("source element '{item_path}' is not an object"),
                        )
                    })?;
                    let Some(actual_item) = actual_item.as_object() else {
                        report.push(Assertion {
                            path: item_path,
                            source_key: scope.source.clone(),
                            target_key: scope.target.clone(),
                            expected: summarize(Some(expected_item)),
                            actual: summarize(Some(actual_item)),
                            outcome: Outcome::Failed(MismatchReason::ShapeDiffers),
                        });
                        continue;
                    };
                    self.walk(
                        &scope.entries,
                        expected_map,
                        actual_item,
                        &scope.source,
                        &item_path,
                        report,
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Validates with the default comparator.
pub fn validate(
    source: &Value,
    target: &Value,
    table: &FieldMappingTable,
) -> Result<ValidationReport> {
    Validator::default().validate(source, target, table)
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn is_null(value: Option<&Value>) -> bool {
    non_null(value).is_none()
}

/// Containers are summarised in assertions so reports stay readable.
fn summarize(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::Object(map)) => Value::String(format!("{{{} field(s)}}", map.len())),
        Some(Value::Array(items)) => Value::String(format!("[{} item(s)]", items.len())),
        Some(scalar) => scalar.clone(),
    }
}
