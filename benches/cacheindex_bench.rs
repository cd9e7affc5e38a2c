use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use netloader::http::cachedresource::HttpCachedResource;
use netloader::http::cacheindex::{self, CacheIndex};
use std::time::SystemTime;
use url::Url;

fn sample_index(count: usize) -> CacheIndex {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("text/html; charset=utf-8"));
    headers.insert("cache-control", HeaderValue::from_static("max-age=600"));
    headers.insert("etag", HeaderValue::from_static("\"abc123\""));
    let now = SystemTime::now();

    let entries = (0..count)
        .map(|i| {
            let url = Url::parse(&format!("https://example.com/assets/{i}/index.html")).unwrap();
            HttpCachedResource::from_response(&url, StatusCode::OK, Version::HTTP_11, &headers, now)
        })
        .collect();
    CacheIndex {
        next_counter: count as u32,
        entries,
    }
}

fn benchmark_index_encode(c: &mut Criterion) {
    let index = sample_index(1000);
    c.bench_function("cacheindex_encode_1000", |b| {
        b.iter(|| black_box(cacheindex::encode(black_box(&index)).unwrap()))
    });
}

fn benchmark_index_decode(c: &mut Criterion) {
    let data = cacheindex::encode(&sample_index(1000)).unwrap();
    c.bench_function("cacheindex_decode_1000", |b| {
        b.iter(|| black_box(cacheindex::decode(black_box(&data)).unwrap()))
    });
}

criterion_group!(benches, benchmark_index_encode, benchmark_index_decode);
criterion_main!(benches);
