use std::collections::BTreeMap;

use pipeline_reconcile::{
    compare::compare,
    mapping::{FieldMappingTable, MappingEntry, ScopeKind},
    naming::{NamingRule, transcode},
    validate::validate,
};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn camel_key() -> impl Strategy<Value = String> {
    "[a-z]{1,6}([A-Z][a-z]{1,6}){0,3}"
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[ -~]{0,12}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn flat_object() -> impl Strategy<Value = BTreeMap<String, Value>> {
    proptest::collection::btree_map(camel_key(), scalar(), 1..8)
}

fn document() -> impl Strategy<Value = Value> {
    let leaf = scalar();
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map(camel_key(), inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn to_object(fields: &BTreeMap<String, Value>) -> Value {
    Value::Object(fields.clone().into_iter().collect())
}

fn identity_table(
    fields: &BTreeMap<String, Value>,
    items: &BTreeMap<String, Value>,
    rule: NamingRule,
) -> FieldMappingTable {
    let mut entries = fields
        .keys()
        .map(|key| MappingEntry::field(key.clone(), rule.apply(key).into_owned()))
        .collect::<Vec<_>>();
    let item_entries = items
        .keys()
        .map(|key| MappingEntry::field(key.clone(), rule.apply(key).into_owned()))
        .collect();
    entries.push(MappingEntry::scope(
        "lineItems",
        rule.apply("lineItems").into_owned(),
        ScopeKind::Array,
        item_entries,
    ));
    FieldMappingTable::new(entries).expect("generated table is well formed")
}

proptest! {
    #[test]
    fn transcoded_documents_validate_against_their_source(
        mut fields in flat_object(),
        items in flat_object(),
        count in 0usize..4,
    ) {
        fields.remove("lineItems");
        let rule = NamingRule::default();
        let mut source = to_object(&fields);
        source["lineItems"] = Value::Array(vec![to_object(&items); count]);

        let target = transcode(&source, rule).expect("camel keys never collide");
        let table = identity_table(&fields, &items, rule);
        let report = validate(&source, &target, &table).expect("table matches document");
        prop_assert!(report.passed(), "{:?}", report.failures().collect::<Vec<_>>());
        prop_assert_eq!(report.len(), fields.len() + 1 + count * items.len());
    }

    #[test]
    fn transcoding_is_idempotent(doc in document()) {
        let rule = NamingRule::default();
        let once = transcode(&doc, rule).expect("camel keys never collide");
        let twice = transcode(&once, rule).expect("second pass is a no-op");
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn inverse_rule_restores_camel_keys(doc in document()) {
        let rule = NamingRule::default();
        let separated = transcode(&doc, rule).expect("camel keys never collide");
        let restored = transcode(&separated, rule.inverse()).expect("inverse never collides");
        prop_assert_eq!(restored, doc);
    }

    #[test]
    fn every_document_compares_equal_to_itself(doc in document()) {
        prop_assert!(compare(Some(&doc), Some(&doc)));
    }

    #[test]
    fn numbers_within_tolerance_compare_equal(base in -1.0e6f64..1.0e6, drift in -0.0004f64..0.0004) {
        prop_assert!(compare(Some(&json!(base)), Some(&json!(base + drift))));
        prop_assert!(!compare(Some(&json!(base)), Some(&json!(base + 0.01))));
    }
}
