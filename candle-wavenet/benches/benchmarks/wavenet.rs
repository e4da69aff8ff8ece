use crate::benchmarks::{bench_device, BenchDevice};
use candle::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_wavenet::{Config, WaveNet};
use criterion::{black_box, criterion_group, Criterion};
use std::time::Instant;

const B: usize = 2;
const T: usize = 4096;

fn run_wavenet_benchmark(c: &mut Criterion, device: &Device, cfg: &Config, name: &str) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let net = WaveNet::new(cfg, vb).unwrap();
    let xs = Tensor::randn(0f32, 1f32, (B, T, cfg.in_channels), device).unwrap();
    let cs = cfg
        .conditioning_channels
        .map(|c| Tensor::randn(0f32, 1f32, (B, T, c), device).unwrap());

    let mut group = c.benchmark_group(device.bench_name(name));
    group.bench_function("iter", move |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _i in 0..iters {
                net.forward(black_box(&xs), black_box(cs.as_ref())).unwrap();
            }
            device.sync().unwrap();
            start.elapsed()
        })
    });
    group.finish();
}

fn criterion_benchmark(c: &mut Criterion) {
    let device = bench_device();
    let small = Config {
        residual_channels: 64,
        skip_channels: Some(64),
        ..Config::default()
    };
    run_wavenet_benchmark(c, &device, &small, "wavenet_64");
    run_wavenet_benchmark(c, &device, &Config::default(), "wavenet_256");
}

criterion_group!(benches, criterion_benchmark);
