//! Tensor view benchmarks
//!
//! Run with: cargo bench --bench views
//!
//! - view_contiguous: materializing permuted views of growing size
//! - view_to_vec: strided reads through `to_vec`
//! - view_marshal: handing borrowed and owned views to the host engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use edgeview::config::InteropConfig;
use edgeview::{DType, EdgeFeature, Engine, FeatureType, HostEngine, TensorView};
use std::sync::Arc;

fn image_like(side: usize) -> Vec<f32> {
    (0..3 * side * side).map(|i| (i % 255) as f32 / 255.0).collect()
}

fn bench_contiguous(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_contiguous");
    for side in [32usize, 128, 512] {
        let data = image_like(side);
        let shape = [1, 3, side as isize, side as isize];
        let view = TensorView::from_slice(&data, &shape).unwrap();
        let permuted = view.permute(&[0, 2, 3, 1]).unwrap();

        group.throughput(Throughput::Elements(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("nchw_to_nhwc", side), &permuted, |b, v| {
            b.iter(|| black_box(v.contiguous().unwrap()))
        });
    }
    group.finish();
}

fn bench_to_vec(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_to_vec");
    let data = image_like(256);
    let view = TensorView::from_slice(&data, &[3, 256, 256]).unwrap();
    let strided = view.permute(&[2, 1, 0]).unwrap();

    group.throughput(Throughput::Elements(data.len() as u64));
    group.bench_function("dense", |b| b.iter(|| black_box(view.to_vec().unwrap())));
    group.bench_function("strided", |b| b.iter(|| black_box(strided.to_vec().unwrap())));
    group.finish();
}

fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_marshal");
    let engine: Arc<dyn Engine> = Arc::new(HostEngine::new());
    let interop = InteropConfig::default();
    let data = image_like(224);
    let expected = FeatureType::array(None, DType::F32, Some(vec![1, 3, 224, 224]));

    let borrowed = TensorView::from_slice(&data, &[1, 3, 224, 224]).unwrap();
    let owned = TensorView::from_vec(data.clone(), &[1, 3, 224, 224]).unwrap();

    group.bench_function("borrowed_no_copy", |b| {
        b.iter(|| black_box(borrowed.create_native(&engine, &expected, &interop).unwrap()))
    });
    group.bench_function("owned_copy", |b| {
        b.iter(|| black_box(owned.create_native(&engine, &expected, &interop).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_contiguous, bench_to_vec, bench_marshal);
criterion_main!(benches);
