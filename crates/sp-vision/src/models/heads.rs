// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::utils::{grad_or_zeros, CELL_SIZE};
use sp_nn::{
    ChannelSlice, ChannelSoftmax, Conv2d, Module, Parameter, Parameterized, Relu, Sequential,
};
use sp_tensor::{PureResult, Tensor};

/// Pixel positions inside one cell.
pub const CELL_POSITIONS: usize = CELL_SIZE * CELL_SIZE;
/// Cell positions plus the trailing "no keypoint" dustbin.
pub const DETECTOR_BINS: usize = CELL_POSITIONS + 1;
/// Descriptor length per cell.
pub const DESCRIPTOR_DIM: usize = 256;
const HEAD_WIDTH: usize = 256;

/// Per-cell keypoint classifier.
///
/// `convPa` (3x3) and ReLU feed `convPb` (1x1) which scores the 65 bins of
/// every cell. The probabilities are a softmax over those bins with the
/// dustbin dropped afterwards, so retained values sum to at most one.
#[derive(Debug)]
pub struct DetectorHead {
    conv_a: Conv2d,
    relu: Relu,
    conv_b: Conv2d,
    softmax: ChannelSoftmax,
    dustbin: ChannelSlice,
}

impl DetectorHead {
    pub fn new(in_channels: usize, hw: (usize, usize), seed: Option<u64>) -> PureResult<Self> {
        let conv_a = Conv2d::same3x3_seeded("convPa", in_channels, HEAD_WIDTH, hw, seed)?;
        let conv_b = Conv2d::pointwise_seeded("convPb", HEAD_WIDTH, DETECTOR_BINS, hw, seed)?;
        Ok(Self {
            conv_a,
            relu: Relu::new(),
            conv_b,
            softmax: ChannelSoftmax::new(DETECTOR_BINS, hw)?,
            dustbin: ChannelSlice::drop_last(DETECTOR_BINS, hw)?,
        })
    }

    pub fn hw(&self) -> (usize, usize) {
        self.conv_a.input_hw()
    }

    pub fn in_channels(&self) -> usize {
        self.conv_a.in_channels()
    }

    fn logits_with_hidden(&self, features: &Tensor) -> PureResult<(Tensor, Tensor, Tensor)> {
        let hidden = self.conv_a.forward(features)?;
        let activated = self.relu.forward(&hidden)?;
        let logits = self.conv_b.forward(&activated)?;
        Ok((hidden, activated, logits))
    }

    /// Returns `(logits, prob)` with 65 and 64 channels respectively.
    pub fn forward(&self, features: &Tensor) -> PureResult<(Tensor, Tensor)> {
        let (_, _, logits) = self.logits_with_hidden(features)?;
        let full = self.softmax.forward(&logits)?;
        let prob = self.dustbin.forward(&full)?;
        Ok((logits, prob))
    }

    /// Propagates gradients of the logits and of the retained probabilities
    /// back to the encoder features. Either may be omitted.
    pub fn backward(
        &mut self,
        features: &Tensor,
        grad_logits: Option<&Tensor>,
        grad_prob: Option<&Tensor>,
    ) -> PureResult<Tensor> {
        let (hidden, activated, logits) = self.logits_with_hidden(features)?;
        let mut grad = grad_or_zeros(grad_logits, logits.shape())?;
        if let Some(grad_prob) = grad_prob {
            let padded = self.dustbin.backward(&logits, grad_prob)?;
            let through_softmax = self.softmax.backward(&logits, &padded)?;
            grad = grad.add(&through_softmax)?;
        }
        let grad_activated = self.conv_b.backward(&activated, &grad)?;
        let grad_hidden = self.relu.backward(&hidden, &grad_activated)?;
        self.conv_a.backward(features, &grad_hidden)
    }
}

impl Parameterized for DetectorHead {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv_a.visit_parameters(visitor)?;
        self.conv_b.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv_a.visit_parameters_mut(visitor)?;
        self.conv_b.visit_parameters_mut(visitor)
    }
}

/// Raw 256-d descriptor head: `convDa` (3x3) + ReLU + `convDb` (1x1).
#[derive(Debug)]
pub struct DescriptorHead {
    layers: Sequential,
    hw: (usize, usize),
}

impl DescriptorHead {
    pub fn new(in_channels: usize, hw: (usize, usize), seed: Option<u64>) -> PureResult<Self> {
        let layers = Sequential::new()
            .with(Conv2d::same3x3_seeded(
                "convDa",
                in_channels,
                HEAD_WIDTH,
                hw,
                seed,
            )?)
            .with(Relu::new())
            .with(Conv2d::pointwise_seeded(
                "convDb",
                HEAD_WIDTH,
                DESCRIPTOR_DIM,
                hw,
                seed,
            )?);
        Ok(Self { layers, hw })
    }

    pub fn hw(&self) -> (usize, usize) {
        self.hw
    }

    pub fn output_channels(&self) -> usize {
        DESCRIPTOR_DIM
    }
}

impl Module for DescriptorHead {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.layers.forward(input)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.layers.backward(input, grad_output)
    }
}

impl Parameterized for DescriptorHead {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.layers.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.layers.visit_parameters_mut(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn features(hw: (usize, usize), seed: u64) -> Tensor {
        Tensor::random_normal(1, 128 * hw.0 * hw.1, 0.0, 1.0, Some(seed)).unwrap()
    }

    #[test]
    fn detector_drops_the_dustbin() {
        let head = DetectorHead::new(128, (2, 3), Some(5)).unwrap();
        let (logits, prob) = head.forward(&features((2, 3), 1)).unwrap();
        assert_eq!(logits.shape(), (1, 65 * 6));
        assert_eq!(prob.shape(), (1, 64 * 6));
        for s in 0..6 {
            let total: f32 = (0..64).map(|c| prob.data()[c * 6 + s]).sum();
            assert!(total >= 0.0 && total <= 1.0 + 1e-5);
            assert!((0..64).all(|c| prob.data()[c * 6 + s] >= 0.0));
        }
    }

    #[test]
    fn detector_gradients_combine_both_outputs() {
        let hw = (2, 2);
        let input = features(hw, 2);
        let grad_logits = Tensor::random_normal(1, 65 * 4, 0.0, 1.0, Some(3)).unwrap();
        let grad_prob = Tensor::random_normal(1, 64 * 4, 0.0, 1.0, Some(4)).unwrap();

        let mut both = DetectorHead::new(128, hw, Some(7)).unwrap();
        let mut logits_only = DetectorHead::new(128, hw, Some(7)).unwrap();
        let mut prob_only = DetectorHead::new(128, hw, Some(7)).unwrap();

        let combined = both
            .backward(&input, Some(&grad_logits), Some(&grad_prob))
            .unwrap();
        let a = logits_only
            .backward(&input, Some(&grad_logits), None)
            .unwrap();
        let b = prob_only.backward(&input, None, Some(&grad_prob)).unwrap();
        let summed = a.add(&b).unwrap();
        for (x, y) in combined.data().iter().zip(summed.data()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn descriptor_head_is_unnormalised() {
        let head = DescriptorHead::new(128, (2, 2), Some(9)).unwrap();
        let out = head.forward(&features((2, 2), 6)).unwrap();
        assert_eq!(out.shape(), (1, 256 * 4));
        let norms: Vec<f32> = (0..4)
            .map(|s| {
                (0..256)
                    .map(|c| out.data()[c * 4 + s].powi(2))
                    .sum::<f32>()
                    .sqrt()
            })
            .collect();
        assert!(norms.iter().any(|n| (n - 1.0).abs() > 1e-3));

        let mut names = Vec::new();
        head.visit_parameters(&mut |param| {
            names.push(param.name().to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(
            names,
            vec!["convDa::weight", "convDa::bias", "convDb::weight", "convDb::bias"]
        );
    }
}
