//! Latency benchmarks for the per-record hot path
//!
//! Covers the CPU work done for every record on both ingestion paths:
//! - Row validation
//! - Live transaction mapping (hex to decimal)
//! - JSON payload encoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chain_tx_pipeline::chain::RawChainTransaction;
use chain_tx_pipeline::record::{validate_row, RawRow, TransactionRecord};
use chain_tx_pipeline::watcher::map_transaction;

fn sample_row() -> RawRow {
    serde_json::from_value(serde_json::json!({
        "timestamp": "2024-03-01 12:00:00",
        "status": "success",
        "block_number": "42000000",
        "tx_index": "17",
        "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        "to": "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        "value": "1000000000000000000",
        "gas_limit": "21000",
        "gas_used": "21000",
        "gas_price": "25000000000"
    }))
    .unwrap()
}

fn sample_tx() -> RawChainTransaction {
    RawChainTransaction {
        hash: "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef".to_string(),
        block_number: Some("0x280de80".to_string()),
        transaction_index: Some("0x11".to_string()),
        from: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
        to: Some("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D".to_string()),
        value: "0xde0b6b3a7640000".to_string(),
        gas: "0x5208".to_string(),
        max_fee_per_gas: Some("0x5d21dba00".to_string()),
        ..Default::default()
    }
}

/// Benchmark row validation
fn bench_validate_row(c: &mut Criterion) {
    let row = sample_row();

    c.bench_function("validate_row", |b| b.iter(|| black_box(validate_row(black_box(&row)).unwrap())));
}

/// Benchmark live mapping followed by validation
fn bench_map_transaction(c: &mut Criterion) {
    let tx = sample_tx();

    c.bench_function("map_and_validate_transaction", |b| {
        b.iter(|| {
            let row = map_transaction(black_box(&tx), None, "2024-03-01T12:00:00.000Z").unwrap();
            black_box(validate_row(&row).unwrap())
        })
    });
}

/// Benchmark encoding chunks of payloads
fn bench_encode_records(c: &mut Criterion) {
    let record = validate_row(&sample_row()).unwrap();
    let mut group = c.benchmark_group("encode_records");

    for size in [1usize, 100, 2000] {
        let records: Vec<TransactionRecord> = vec![record.clone(); size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &records, |b, records| {
            b.iter(|| {
                let payloads: Vec<String> = records.iter().map(|r| r.to_json().unwrap()).collect();
                black_box(payloads)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate_row, bench_map_transaction, bench_encode_records);
criterion_main!(benches);
