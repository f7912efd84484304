// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Builds the default SuperPoint network, runs one random 240x320 image
//! through it and logs the output shapes.
//!
//! `RUST_LOG=debug` also shows the per-layer construction and forward spans;
//! `SPIRALPOINT_TRACE_CHROME=trace.json` additionally writes a chrome trace.

use sp_core::telemetry::{init_tracing, shutdown_tracing};
use sp_tensor::{PureResult, Tensor};
use sp_vision::{FeatureMap, SuperPointConfig, SuperPointNet};
use tracing::info;

fn log_map(label: &str, map: &FeatureMap) {
    let [batch, channels, height, width] = map.dims();
    info!(output = label, batch, channels, height, width, "output shape");
}

fn main() -> PureResult<()> {
    init_tracing();

    let config = SuperPointConfig::default().with_seed(0);
    let (height, width) = config.input_hw;
    let net = SuperPointNet::new(config)?;
    let image = Tensor::random_uniform(1, height * width, 0.0, 1.0, Some(1))?;

    let (logits, descriptor, prob, feature) = net.forward(&image)?.into_tuple();
    log_map("logits", &logits);
    log_map("descriptor", &descriptor);
    log_map("prob", &prob);
    log_map("feature", &feature);

    let strongest = prob
        .tensor()
        .data()
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    info!(strongest, "max cell-position probability");

    shutdown_tracing();
    Ok(())
}
