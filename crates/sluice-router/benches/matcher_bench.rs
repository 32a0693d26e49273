// Path and host matcher benchmarks
//
// Run with: cargo bench -p sluice-router --bench matcher_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sluice_router::{path_matches, HostMatcher, PathMatcher};

fn benchmark_path_matcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_matcher");

    let cases = [
        ("literal", "/api/v1/users", "/api/v1/users"),
        ("segment_wildcard", "/api/*/users/*.json", "/api/v1/users/42.json"),
        ("trailing_double_star", "/static/**", "/static/css/site/main.css"),
        ("inner_double_star", "/api/**/edit", "/api/orgs/7/users/42/edit"),
    ];

    for (name, pattern, path) in cases {
        let matcher = PathMatcher::new(pattern);
        group.bench_with_input(BenchmarkId::new("compiled", name), &path, |b, path| {
            b.iter(|| matcher.matches(black_box(path)))
        });
        group.bench_with_input(BenchmarkId::new("one_shot", name), &path, |b, path| {
            b.iter(|| path_matches(black_box(pattern), black_box(path)))
        });
    }

    group.finish();
}

fn benchmark_host_matcher(c: &mut Criterion) {
    let matcher = HostMatcher::new("**.example.com").unwrap();
    c.bench_function("host_matcher", |b| {
        b.iter(|| matcher.matches(black_box("api.eu.example.com:8443")))
    });
}

criterion_group!(benches, benchmark_path_matcher, benchmark_host_matcher);
criterion_main!(benches);
