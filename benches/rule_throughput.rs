use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use smallvec::smallvec;

use pumpaudit::domain::{
    BatchId, FuelRecord, IdentityField, MembershipSpec, RecordId, RuleDef, RuleId, RuleSpec,
};
use pumpaudit::rules::{evaluate, AccumulationState};

fn test_record(i: u64) -> FuelRecord {
    FuelRecord {
        record_id: RecordId::new(format!("TX-{i:08}")),
        batch_id: BatchId(1),
        event_date: "2024-03-05".to_string(),
        event_time: "08:15:00".to_string(),
        station_code: Some("34.1001".to_string()),
        product: Some("DIESEL".to_string()),
        volume_liters: Some(Decimal::new(35 + (i % 200) as i64, 0)),
        consumer_type: Some("PRIVATE".to_string()),
        plate_number: Some(format!("B{:04}XYZ", i % 500)),
        national_id: Some("3171000000000001".to_string()),
        plate_color: Some("BLACK".to_string()),
    }
}

fn bench_threshold_rule(c: &mut Criterion) {
    let rule = RuleDef {
        id: RuleId::new("vol_1"),
        active: true,
        description: None,
        spec: RuleSpec::Threshold {
            min_volume: Decimal::new(150, 0),
            consumer_type: "PRIVATE".to_string(),
        },
    };
    let record = test_record(42);

    c.bench_function("threshold_rule_evaluate", |b| {
        b.iter(|| evaluate(black_box(&record), black_box(&rule)))
    });
}

fn bench_membership_rule(c: &mut Criterion) {
    let rule = RuleDef {
        id: RuleId::new("spec_1"),
        active: true,
        description: None,
        spec: RuleSpec::Membership(MembershipSpec::MissingIdentity {
            fields: smallvec![IdentityField::PlateNumber, IdentityField::NationalId],
        }),
    };
    let record = test_record(42);

    c.bench_function("membership_rule_evaluate", |b| {
        b.iter(|| evaluate(black_box(&record), black_box(&rule)))
    });
}

fn bench_accumulation_pass(c: &mut Criterion) {
    let rule = RuleDef {
        id: RuleId::new("acc_1"),
        active: true,
        description: None,
        spec: RuleSpec::Accumulation {
            group_by: pumpaudit::domain::GroupKey::PlateNumber,
            min_total_volume: Decimal::new(10_000, 0),
        },
    };
    let records: Vec<FuelRecord> = (0..10_000).map(test_record).collect();

    c.bench_function("accumulation_pass_10k_records", |b| {
        b.iter(|| {
            let mut state = AccumulationState::for_rule(&rule).unwrap();
            let mut fired = 0u64;
            for record in &records {
                if state.observe(black_box(record)).is_some() {
                    fired += 1;
                }
            }
            fired
        })
    });
}

criterion_group!(
    benches,
    bench_threshold_rule,
    bench_membership_rule,
    bench_accumulation_pass
);
criterion_main!(benches);
