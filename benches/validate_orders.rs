use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use pipeline_reconcile::{
    mapping::FieldMappingTable,
    naming::{NamingRule, transcode},
    reconcile::{MatchKey, pair_and_validate},
    validate::Validator,
};
use serde_json::{Value, json};

const MAPPINGS: &str = "\
orderId=order_id
customer={customerId=customer_id,name=name}
items=[productId=product_id,quantity=quantity,unitPrice=unit_price]
totalAmount=total_amount
";

fn generate_orders(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let items = (0..(i % 5) + 1)
                .map(|n| {
                    json!({
                        "productId": format!("P{n}"),
                        "quantity": (n + i) % 7 + 1,
                        "unitPrice": 1.25 * (n + 1) as f64,
                    })
                })
                .collect::<Vec<_>>();
            json!({
                "orderId": format!("ORD-{i}"),
                "customer": {"customerId": format!("C{}", i % 97), "name": "Ann"},
                "items": items,
                "totalAmount": 10.5 + i as f64,
            })
        })
        .collect()
}

fn bench_validate_orders(c: &mut Criterion) {
    let sources = generate_orders(10_000);
    let stored = sources
        .iter()
        .rev()
        .map(|doc| transcode(doc, NamingRule::default()).expect("transcode"))
        .collect::<Vec<_>>();
    let table = FieldMappingTable::parse(MAPPINGS).expect("parse mappings");
    let validator = Validator::default();
    let key = MatchKey::renamed("orderId", NamingRule::default());

    let mut group = c.benchmark_group("validate_orders");

    group.bench_function("transcode_10k", |b| {
        b.iter(|| {
            for doc in &sources {
                black_box(transcode(doc, NamingRule::default()).expect("transcode"));
            }
        });
    });

    group.bench_function("pair_and_validate_10k", |b| {
        b.iter_batched(
            || stored.clone(),
            |retrieved| {
                let outcomes =
                    pair_and_validate(&sources, retrieved, &table, &validator, Some(&key))
                        .expect("validate");
                black_box(outcomes);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_validate_orders);
criterion_main!(benches);
