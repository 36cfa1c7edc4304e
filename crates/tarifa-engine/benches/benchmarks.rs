//! Tarifa Engine Benchmarks
//!
//! - Prefix index build and longest-prefix lookup
//! - Derivation of a full carrier revision

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chrono::Utc;
use rust_decimal::Decimal;

use tarifa_common::{CardId, ProfitAssurance, ProfitRule, RateEntry, RateTable, RevisionDraft};
use tarifa_engine::{
    CompiledRateTable, DerivationPipeline, DerivationSettings, PrefixIndex, RuleResolver,
};

/// Deterministic prefix set: country codes with a fan of longer subprefixes
fn prefixes(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let country = 1 + (i % 250);
            let tail = i / 250;
            if tail == 0 {
                country.to_string()
            } else {
                format!("{}{}", country, tail)
            }
        })
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn carrier_table(count: usize) -> RateTable {
    let entries = prefixes(count)
        .into_iter()
        .enumerate()
        .map(|(i, p)| RateEntry::new(p, "dest", Decimal::new(100 + (i as i64 % 900), 5)))
        .collect();
    RateTable::seal(RevisionDraft::upload(CardId::new(), entries, None), 1, Utc::now())
}

// ============ PREFIX INDEX ============

fn bench_prefix_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_index");

    for size in [1_000usize, 10_000, 50_000].iter() {
        let keys = prefixes(*size);
        let index = PrefixIndex::build(keys.iter().map(|p| (p.clone(), ()))).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("longest_match", size), &index, |b, index| {
            b.iter(|| index.longest_match(black_box("4479111234567")));
        });

        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::new("build", size), &keys, |b, keys| {
            b.iter(|| PrefixIndex::build(keys.iter().map(|p| (p.as_str(), ()))).unwrap());
        });
    }

    group.finish();
}

fn bench_compiled_lookup(c: &mut Criterion) {
    let compiled = CompiledRateTable::compile(&carrier_table(20_000)).unwrap();
    c.bench_function("compiled_rate_table/lookup", |b| {
        b.iter(|| compiled.lookup(black_box("+12125551234"), None));
    });
}

// ============ DERIVATION ============

fn bench_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("derivation");

    let rules: Vec<ProfitRule> = std::iter::once(ProfitRule::percentage("", Decimal::new(10, 2)))
        .chain((1..=50).map(|cc| ProfitRule::fixed(cc.to_string(), Decimal::new(5, 4))))
        .collect();
    let resolver = RuleResolver::from_rules(&rules).unwrap();

    for size in [1_000usize, 10_000].iter() {
        let parent = carrier_table(*size);
        let settings = DerivationSettings {
            precision: Default::default(),
            profit_assurance: ProfitAssurance::enabled(),
        };
        let pipeline = DerivationPipeline::new(&resolver, settings);

        group.throughput(Throughput::Elements(parent.entries().len() as u64));
        group.bench_with_input(BenchmarkId::new("entries", size), &parent, |b, parent| {
            b.iter(|| pipeline.derive(black_box(parent)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prefix_lookup, bench_compiled_lookup, bench_derivation);
criterion_main!(benches);
