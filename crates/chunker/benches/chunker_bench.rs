//! Benchmarks for text chunking.
//!
//! Run with: cargo bench

use chunker::{ChunkOptions, split};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokenizer::ApproxTokenizer;

fn generate_prose(sentences: usize) -> String {
  let mut text = String::new();
  for i in 0..sentences {
    text.push_str(&format!(
      "Sentence number {i} describes something about the document; it has a few clauses, some punctuation, and ends here. "
    ));
  }
  text
}

fn bench_chunk_prose(c: &mut Criterion) {
  let mut group = c.benchmark_group("chunk_prose");
  let tokenizer = ApproxTokenizer::new("cl100k_base", 4.0);
  let options = ChunkOptions::new(200, 20);

  for size in [50, 200, 1000, 4000].iter() {
    let text = generate_prose(*size);
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
      b.iter(|| split(black_box(text), black_box(&options), black_box(&tokenizer)).unwrap());
    });
  }

  group.finish();
}

fn bench_chunk_dense_no_separators(c: &mut Criterion) {
  let mut group = c.benchmark_group("chunk_dense_no_separators");
  let tokenizer = ApproxTokenizer::new("cl100k_base", 4.0);
  let options = ChunkOptions::new(50, 0);

  for size in [1000, 10000].iter() {
    let text = "a".repeat(*size);
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
      b.iter(|| split(black_box(text), black_box(&options), black_box(&tokenizer)).unwrap());
    });
  }

  group.finish();
}

criterion_group!(benches, bench_chunk_prose, bench_chunk_dense_no_separators);
criterion_main!(benches);
