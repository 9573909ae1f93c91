use auris_convert::PcmConverter;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_convert(c: &mut Criterion) {
    let chunk: Vec<u8> = (0..2400i16).flat_map(|v| v.to_le_bytes()).collect();

    c.bench_function("convert_24k_to_16k_mono", |b| {
        let mut conv = PcmConverter::new(1, 24000, 1, 16000).unwrap();
        b.iter(|| conv.convert(black_box(&chunk)).unwrap());
    });

    c.bench_function("convert_stereo_to_mono_passthrough_rate", |b| {
        let mut conv = PcmConverter::new(2, 24000, 1, 24000).unwrap();
        b.iter(|| conv.convert(black_box(&chunk)).unwrap());
    });
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
