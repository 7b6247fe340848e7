#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use pipeline_reconcile::{
    builder::FlatRow,
    mapping::FieldMappingTable,
    schema::{Schema, load_schema},
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn order_schema() -> Schema {
    load_schema(&fixture_path("orders.avsc")).expect("load order schema")
}

pub fn order_mappings() -> FieldMappingTable {
    FieldMappingTable::load(&fixture_path("field-mappings.properties")).expect("load mappings")
}

/// The single-order row used across the round-trip tests.
pub fn order_row(order_id: &str) -> FlatRow {
    FlatRow::new()
        .with("orderId", order_id)
        .with(
            "customer",
            FlatRow::new().with("customerId", "C1").with("name", "Ann"),
        )
        .with(
            "items",
            pipeline_reconcile::builder::RowValue::List(vec![
                FlatRow::new()
                    .with("productId", "P1")
                    .with("quantity", json!(2))
                    .into(),
            ]),
        )
        .with("totalAmount", json!(9.99))
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}
