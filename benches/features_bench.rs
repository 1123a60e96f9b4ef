use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use wayback_discover_diff::extract_html_features;

const SMALL_PAGE: &str = "<html>
<title>my title</title>
<body>
abc
a.b.c.
abc.
test
123
abc
</body>
</html>";

fn large_page() -> String {
    let mut body = String::from("<html><head><title>benchmark page</title></head><body>");
    for i in 0..2000 {
        body.push_str(&format!(
            "<p>paragraph {} with some repeated filler text, punctuation. and /paths/like/this</p>",
            i
        ));
    }
    body.push_str("<script>var ignored = 'entirely';</script></body></html>");
    body
}

fn bench_extract_features(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_html_features");

    group.throughput(Throughput::Bytes(SMALL_PAGE.len() as u64));
    group.bench_function("small_page", |b| {
        b.iter(|| extract_html_features(black_box(SMALL_PAGE)));
    });

    let page = large_page();
    group.throughput(Throughput::Bytes(page.len() as u64));
    group.bench_function("large_page", |b| {
        b.iter(|| extract_html_features(black_box(&page)));
    });

    group.finish();
}

criterion_group!(benches, bench_extract_features);
criterion_main!(benches);
