mod common;

use common::{TestWorkspace, fixture_path, order_mappings, order_schema};
use encoding_rs::{UTF_8, WINDOWS_1252};
use pipeline_reconcile::{
    builder::{RowValue, build_all},
    fixture::{IsolationSuffix, read_fixture},
    mapping::FieldMappingTable,
    naming::NamingRule,
};
use serde_json::json;

#[test]
fn order_fixture_builds_into_records() {
    let schema = order_schema();
    let rows = read_fixture(&fixture_path("orders.csv"), &schema, None, UTF_8).unwrap();
    assert_eq!(rows.len(), 2);

    let records = build_all(&rows, &schema).unwrap();
    let first = records[0].to_document();
    assert_eq!(first["items"], json!([{"productId": "P1", "quantity": 2}]));
    assert_eq!(first["totalAmount"], json!(9.99));
    let second = records[1].to_document();
    assert_eq!(second["notes"], json!("leave at door"));
    assert_eq!(second["items"][1], json!({"productId": "P3", "quantity": 4}));
}

#[test]
fn derived_table_equals_checked_in_table() {
    let derived = FieldMappingTable::derive(&order_schema(), NamingRule::default()).unwrap();
    assert_eq!(derived, order_mappings());
}

#[test]
fn tab_separated_latin1_fixture_is_decoded() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("orders.tsv");
    let (bytes, _, _) = WINDOWS_1252.encode("orderId\tcustomer.name\titems[].quantity\nA\tRené\t7\n");
    std::fs::write(&path, bytes).unwrap();

    let rows = read_fixture(&path, &order_schema(), None, WINDOWS_1252).unwrap();
    let customer = match rows[0].get("customer") {
        Some(RowValue::Group(group)) => group,
        other => panic!("expected customer group, got {other:?}"),
    };
    assert_eq!(customer.get("name"), Some(&RowValue::Scalar(json!("René"))));
    match rows[0].get("items") {
        Some(RowValue::List(items)) => assert_eq!(items.len(), 1),
        other => panic!("expected item list, got {other:?}"),
    }
}

#[test]
fn isolation_suffix_only_touches_the_named_field() {
    let schema = order_schema();
    let mut rows = read_fixture(&fixture_path("orders.csv"), &schema, None, UTF_8).unwrap();
    IsolationSuffix::new("orderId", "t1")
        .unwrap()
        .apply_all(&mut rows)
        .unwrap();
    let records = build_all(&rows, &schema).unwrap();
    assert_eq!(records[0].get("orderId"), Some(&json!("ORD-1_t1")));
    assert_eq!(records[1].get("orderId"), Some(&json!("ORD-2_t1")));
    assert_eq!(records[0].to_document()["customer"]["customerId"], json!("C1"));
}
