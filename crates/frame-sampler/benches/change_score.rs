use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage};
use video_digest_sampler::{change_score, downsample_gray};

fn frame(offset: u8) -> RgbImage {
    RgbImage::from_fn(1280, 720, |x, y| {
        let v = ((x + y) as u8).wrapping_add(offset);
        Rgb([v, v.wrapping_mul(3), v.wrapping_mul(7)])
    })
}

fn bench_scoring(c: &mut Criterion) {
    let a = frame(0);
    let b = frame(40);
    let thumb_a = downsample_gray(&a, 64);
    let thumb_b = downsample_gray(&b, 64);

    c.bench_function("downsample_gray_720p", |bench| {
        bench.iter(|| downsample_gray(black_box(&a), 64))
    });
    c.bench_function("change_score_64", |bench| {
        bench.iter(|| change_score(black_box(&thumb_a), black_box(&thumb_b)))
    });
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
