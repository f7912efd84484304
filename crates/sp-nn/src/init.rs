// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Weight initialisers for convolution kernels.

use sp_config::determinism;
use sp_tensor::{PureResult, Tensor, TensorError};

/// Resolves the seed a named layer should draw from.
///
/// An explicit seed is mixed with the layer label so sibling layers sharing a
/// network seed still get independent streams. Without one, deterministic
/// mode derives a seed from the label and otherwise host entropy is used.
pub fn layer_seed(seed: Option<u64>, label: &str) -> Option<u64> {
    match seed {
        Some(_) => determinism::derive_seed(seed, label),
        None => {
            let cfg = determinism::config();
            cfg.enabled.then(|| cfg.seed_for(label))
        }
    }
}

/// Kaiming-normal initialisation in fan-out mode with the ReLU gain:
/// `std = sqrt(2 / (out_channels * kh * kw))`.
///
/// Returns an `(out_channels, in_channels * kh * kw)` tensor.
pub fn kaiming_normal_fan_out(
    out_channels: usize,
    in_channels: usize,
    kernel: (usize, usize),
    seed: Option<u64>,
) -> PureResult<Tensor> {
    let fan_out = out_channels * kernel.0 * kernel.1;
    if fan_out == 0 || in_channels == 0 {
        return Err(TensorError::InvalidDimensions {
            rows: out_channels,
            cols: in_channels * kernel.0 * kernel.1,
        });
    }
    let std = (2.0f32 / fan_out as f32).sqrt();
    Tensor::random_normal(
        out_channels,
        in_channels * kernel.0 * kernel.1,
        0.0,
        std,
        seed,
    )
}

/// Default convolution bias: uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in))`
/// with `fan_in = in_channels * kh * kw`.
pub fn conv_bias_uniform(
    out_channels: usize,
    in_channels: usize,
    kernel: (usize, usize),
    seed: Option<u64>,
) -> PureResult<Tensor> {
    let fan_in = in_channels * kernel.0 * kernel.1;
    if fan_in == 0 || out_channels == 0 {
        return Err(TensorError::InvalidDimensions {
            rows: 1,
            cols: out_channels,
        });
    }
    let bound = 1.0 / (fan_in as f32).sqrt();
    Tensor::random_uniform(1, out_channels, -bound, bound, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kaiming_fan_out_matches_expected_spread() {
        let weight = kaiming_normal_fan_out(256, 128, (3, 3), Some(1)).unwrap();
        assert_eq!(weight.shape(), (256, 128 * 9));
        let n = weight.len() as f32;
        let mean = weight.data().iter().sum::<f32>() / n;
        let var = weight
            .data()
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f32>()
            / n;
        let expected = (2.0f32 / (256.0 * 9.0)).sqrt();
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(var.sqrt(), expected, epsilon = expected * 0.02);
    }

    #[test]
    fn bias_stays_inside_fan_in_bound() {
        let bias = conv_bias_uniform(65, 256, (1, 1), Some(3)).unwrap();
        let bound = 1.0 / 16.0;
        assert_eq!(bias.shape(), (1, 65));
        assert!(bias.data().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn explicit_seeds_are_mixed_with_labels() {
        let a = layer_seed(Some(11), "conv1a");
        let b = layer_seed(Some(11), "conv1b");
        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);
        assert_eq!(a, layer_seed(Some(11), "conv1a"));
    }
}
