use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use docwire::core::bson::{decode_document, encode_document};
use docwire::core::document::{Binary, DateTime, Document, Value};
use docwire::core::oid::ObjectId;
use docwire::protocol::message::{encode_command, MessageFormat};
use docwire::utils::compression::Compressor;
use docwire::doc;

fn order(i: i32) -> Document {
    doc! {
        "_id" => ObjectId::new(),
        "customer" => format!("customer-{i}"),
        "placed" => DateTime::from_millis(1_700_000_000_000 + i64::from(i)),
        "total" => 19.99 * f64::from(i),
        "lines" => (0..5)
            .map(|n| doc! { "sku" => format!("SKU-{n}"), "qty" => n, "price" => 4.5 })
            .collect::<Vec<_>>(),
        "tags" => vec!["priority", "gift"],
        "blob" => Binary::generic(vec![7u8; 64]),
        "note" => Value::Null,
    }
}

#[allow(clippy::unwrap_used)]
fn bench_document_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_codec");
    for &count in &[1usize, 100, 1000] {
        let batch = doc! {
            "insert" => "orders",
            "documents" => (0..count as i32).map(order).collect::<Vec<_>>(),
        };
        let bytes = encode_document(&batch).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_function(format!("encode_{count}_docs"), |b| {
            b.iter(|| encode_document(black_box(&batch)).unwrap())
        });
        group.bench_function(format!("decode_{count}_docs"), |b| {
            b.iter(|| decode_document(black_box(&bytes)).unwrap())
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_command_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_framing");
    let command = doc! {
        "insert" => "orders",
        "documents" => (0..200).map(order).collect::<Vec<_>>(),
    };

    group.bench_function("op_msg", |b| {
        b.iter(|| encode_command(MessageFormat::OpMsg, "shop", black_box(&command), None).unwrap())
    });
    group.bench_function("op_query", |b| {
        b.iter(|| encode_command(MessageFormat::OpQuery, "shop", black_box(&command), None).unwrap())
    });
    group.bench_function("op_msg_zstd", |b| {
        let zstd = Some(Compressor::Zstd { level: 1 });
        b.iter(|| encode_command(MessageFormat::OpMsg, "shop", black_box(&command), zstd).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_document_codec, bench_command_framing);
criterion_main!(benches);
