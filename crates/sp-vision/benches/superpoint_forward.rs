// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sp_nn::Module;
use sp_tensor::Tensor;
use sp_vision::{
    LossType, OutputType, SuperPointConfig, SuperPointEncoder, SuperPointGrads, SuperPointNet,
};

const BENCH_HW: (usize, usize) = (64, 80);

#[track_caller]
fn unwrap_ok<T, E: core::fmt::Debug>(context: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("{context}: {error:?}"),
    }
}

fn bench_superpoint(c: &mut Criterion) {
    let image = unwrap_ok(
        "image initialiser failed",
        Tensor::random_uniform(1, BENCH_HW.0 * BENCH_HW.1, 0.0, 1.0, Some(3)),
    );
    let encoder = unwrap_ok("encoder build failed", SuperPointEncoder::new(BENCH_HW, Some(1)));
    let float = unwrap_ok(
        "float network build failed",
        SuperPointNet::new(
            SuperPointConfig::new(BENCH_HW, OutputType::Float, LossType::Triplet).with_seed(1),
        ),
    );
    let mut binary = unwrap_ok(
        "binary network build failed",
        SuperPointNet::new(
            SuperPointConfig::new(BENCH_HW, OutputType::Binary, LossType::Pairwise).with_seed(1),
        ),
    );

    let mut group = c.benchmark_group("superpoint_64x80");
    group.sample_size(20);

    group.bench_function("encoder_forward", |b| {
        b.iter(|| black_box(unwrap_ok("encoder forward failed", encoder.forward(&image))));
    });

    group.bench_function("float_forward", |b| {
        b.iter(|| black_box(unwrap_ok("float forward failed", float.forward(&image))));
    });

    group.bench_function("binary_forward", |b| {
        b.iter(|| black_box(unwrap_ok("binary forward failed", binary.forward(&image))));
    });

    let out = unwrap_ok("binary forward failed", binary.forward(&image));
    let grads = SuperPointGrads {
        descriptor: Some(out.descriptor.tensor().clone()),
        prob: Some(out.prob.tensor().clone()),
        ..SuperPointGrads::default()
    };
    group.bench_function("binary_backward", |b| {
        b.iter(|| black_box(unwrap_ok("binary backward failed", binary.backward(&image, &grads))));
    });

    group.finish();
}

criterion_group!(benches, bench_superpoint);
criterion_main!(benches);
