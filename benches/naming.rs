use chrono::{Local, TimeZone};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tapedeck::naming::{DefaultNaming, NameContext, NamingStrategy};
use tapedeck::{Outcome, TestIdentity};

fn bench_default_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("default_naming");
    let naming = DefaultNaming::default();
    let context = NameContext {
        timestamp: Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        run: 0xfeed_beef,
        sequence: 42,
    };

    for len in [16, 128, 1_024] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let name: String = "Browser Test/with:odd*chars "
                .chars()
                .cycle()
                .take(len)
                .collect();
            let identity = TestIdentity::named(name).unwrap();
            let outcome = Outcome::Failed("assertion".to_string());

            b.iter(|| naming.file_name(black_box(&outcome), black_box(&identity), &context));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_default_naming);
criterion_main!(benches);
