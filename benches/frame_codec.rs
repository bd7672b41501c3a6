//! Frame codec benchmarks
//!
//! Run with:
//!   cargo bench --bench frame_codec

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use num_complex::Complex32;

use daq_iq_client::protocol::FrameHeader;
use daq_iq_client::receiver::frame::decode_samples;
use daq_iq_client::receiver::SampleFrame;

fn bench_header_decode(c: &mut Criterion) {
    let mut header = FrameHeader::new(5, 1 << 20, 32);
    header.rf_center_freq = 433_000_000;
    header.time_stamp = 1_700_000_000_000;
    let encoded = header.encode();

    c.bench_function("header_decode", |b| {
        b.iter(|| FrameHeader::decode(black_box(&encoded)))
    });
    c.bench_function("header_encode", |b| b.iter(|| black_box(&header).encode()));
}

fn bench_sample_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_samples");
    let samples = 1 << 16;

    for bit_depth in [8u32, 16, 32] {
        let payload: Vec<u8> = (0..samples * 2 * bit_depth as usize / 8)
            .map(|i| (i % 251) as u8)
            .collect();
        let mut out = vec![Complex32::default(); samples];

        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bit_depth), &payload, |b, payload| {
            b.iter(|| decode_samples(&mut out, black_box(payload), bit_depth))
        });
    }
    group.finish();
}

fn bench_frame_reuse(c: &mut Criterion) {
    let header = FrameHeader::new(5, 1 << 14, 32);
    let payload = vec![0u8; header.payload_size()];
    let mut frame = SampleFrame::new();

    c.bench_function("sample_frame_load_5ch", |b| {
        b.iter(|| frame.load(black_box(&header), black_box(&payload)))
    });
}

criterion_group!(
    benches,
    bench_header_decode,
    bench_sample_conversion,
    bench_frame_reuse
);
criterion_main!(benches);
