use criterion::{criterion_group, criterion_main};

mod network;

criterion_group!(
    benches,
    network::bench_response_parser,
    network::bench_chunked_response,
    network::bench_url_parse,
    gps::bench_nmea_parse,
    gps::bench_receiver_stream
);
criterion_main!(benches);
