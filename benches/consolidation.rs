use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use metric_ingest::query::{consolidate, normalize, Consolidator};
use metric_ingest::types::{Point, Series};

fn points(interval: u32, n: u32) -> Vec<Point> {
    (1..=n)
        .map(|i| Point::new(i * interval, (i % 97) as f64))
        .collect()
}

fn bench_consolidate(c: &mut Criterion) {
    let input = points(10, 8_640);
    let mut group = c.benchmark_group("consolidate");
    for consolidator in [Consolidator::Avg, Consolidator::Sum, Consolidator::Max, Consolidator::Last] {
        group.bench_with_input(
            BenchmarkId::from_parameter(consolidator),
            &consolidator,
            |b, &consolidator| b.iter(|| consolidate(black_box(&input), 6, consolidator)),
        );
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let batch = vec![
        Series::new("a", 10, points(10, 8_640), Consolidator::Avg),
        Series::new("b", 15, points(15, 5_760), Consolidator::Sum),
        Series::new("c", 60, points(60, 1_440), Consolidator::Max),
    ];
    c.bench_function("normalize_day_of_three_series", |b| {
        b.iter(|| normalize(black_box(batch.clone())))
    });
}

criterion_group!(benches, bench_consolidate, bench_normalize);
criterion_main!(benches);
