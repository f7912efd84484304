// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor, TensorError};

/// Softmax across the channel axis, independently at every spatial location
/// of a `(batch, channels * height * width)` feature map.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSoftmax {
    channels: usize,
    spatial: usize,
}

impl ChannelSoftmax {
    pub fn new(channels: usize, hw: (usize, usize)) -> PureResult<Self> {
        let spatial = hw.0 * hw.1;
        if channels == 0 || spatial == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: channels,
                cols: spatial,
            });
        }
        Ok(Self { channels, spatial })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn guard(&self, input: &Tensor) -> PureResult<()> {
        let (rows, cols) = input.shape();
        let expected = self.channels * self.spatial;
        if cols != expected {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, expected),
            });
        }
        Ok(())
    }

    /// Writes the per-location distribution of `row` into `out`.
    fn softmax_row(&self, row: &[f32], out: &mut [f32]) {
        let (channels, spatial) = (self.channels, self.spatial);
        for s in 0..spatial {
            let mut max = f32::NEG_INFINITY;
            for c in 0..channels {
                max = max.max(row[c * spatial + s]);
            }
            let mut total = 0.0f32;
            for c in 0..channels {
                let e = (row[c * spatial + s] - max).exp();
                out[c * spatial + s] = e;
                total += e;
            }
            let inv = 1.0 / total;
            for c in 0..channels {
                out[c * spatial + s] *= inv;
            }
        }
    }
}

impl Module for ChannelSoftmax {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard(input)?;
        let (rows, cols) = input.shape();
        let mut output = Tensor::zeros(rows, cols)?;
        {
            let out_data = output.data_mut();
            for r in 0..rows {
                let row = &input.data()[r * cols..(r + 1) * cols];
                self.softmax_row(row, &mut out_data[r * cols..(r + 1) * cols]);
            }
        }
        Ok(output)
    }

    /// `dx_c = p_c * (g_c - sum_k g_k p_k)` per spatial location.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard(input)?;
        if input.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let prob = self.forward(input)?;
        let (rows, cols) = input.shape();
        let (channels, spatial) = (self.channels, self.spatial);
        let mut grad = Tensor::zeros(rows, cols)?;
        {
            let p = prob.data();
            let g = grad_output.data();
            let out = grad.data_mut();
            for r in 0..rows {
                let base = r * cols;
                for s in 0..spatial {
                    let mut dot = 0.0f32;
                    for c in 0..channels {
                        let idx = base + c * spatial + s;
                        dot += g[idx] * p[idx];
                    }
                    for c in 0..channels {
                        let idx = base + c * spatial + s;
                        out[idx] = p[idx] * (g[idx] - dot);
                    }
                }
            }
        }
        Ok(grad)
    }
}

impl Parameterized for ChannelSoftmax {
    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn distributions_sum_to_one_per_location() {
        let softmax = ChannelSoftmax::new(5, (2, 3)).unwrap();
        let input = Tensor::random_normal(2, 5 * 6, 0.0, 4.0, Some(1)).unwrap();
        let prob = softmax.forward(&input).unwrap();
        for r in 0..2 {
            let row = prob.row(r).unwrap();
            for s in 0..6 {
                let total: f32 = (0..5).map(|c| row[c * 6 + s]).sum();
                assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
            }
        }
        assert!(prob.data().iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn large_logits_stay_finite() {
        let softmax = ChannelSoftmax::new(2, (1, 1)).unwrap();
        let input = Tensor::from_vec(1, 2, vec![1000.0, 999.0]).unwrap();
        let prob = softmax.forward(&input).unwrap();
        assert!(prob.data().iter().all(|p| p.is_finite()));
        assert!(prob.data()[0] > prob.data()[1]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut softmax = ChannelSoftmax::new(4, (1, 2)).unwrap();
        let input = Tensor::random_normal(1, 8, 0.0, 1.0, Some(3)).unwrap();
        let cotangent = Tensor::random_normal(1, 8, 0.0, 1.0, Some(4)).unwrap();
        let grad = softmax.backward(&input, &cotangent).unwrap();
        let objective = |x: &Tensor| -> f32 {
            let p = softmax.forward(x).unwrap();
            p.data().iter().zip(cotangent.data()).map(|(a, b)| a * b).sum()
        };
        let eps = 1e-3;
        for i in 0..8 {
            let mut plus = input.clone();
            plus.data_mut()[i] += eps;
            let mut minus = input.clone();
            minus.data_mut()[i] -= eps;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(numeric, grad.data()[i], epsilon = 2e-3);
        }
    }
}
