// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor, TensorError};

/// L2 normalisation across channels at every spatial location.
///
/// Without an epsilon the norm is used as-is, so an all-zero channel vector
/// yields non-finite outputs. With `Some(eps)` the denominator is clamped to
/// `max(norm, eps)`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelL2Norm {
    channels: usize,
    spatial: usize,
    epsilon: Option<f32>,
}

impl ChannelL2Norm {
    pub fn new(channels: usize, hw: (usize, usize), epsilon: Option<f32>) -> PureResult<Self> {
        let spatial = hw.0 * hw.1;
        if channels == 0 || spatial == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: channels,
                cols: spatial,
            });
        }
        if let Some(eps) = epsilon {
            if !(eps > 0.0) || !eps.is_finite() {
                return Err(TensorError::NonFiniteValue {
                    label: "channel_l2_norm_epsilon",
                    value: eps,
                });
            }
        }
        Ok(Self {
            channels,
            spatial,
            epsilon,
        })
    }

    pub fn epsilon(&self) -> Option<f32> {
        self.epsilon
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

    /// Per-location `(norm, denominator)` for every row, row-major over `(row, s)`.
    fn denominators(&self, input: &Tensor) -> Vec<(f32, f32)> {
        let (rows, cols) = input.shape();
        let (channels, spatial) = (self.channels, self.spatial);
        let data = input.data();
        let mut out = Vec::with_capacity(rows * spatial);
        for r in 0..rows {
            let base = r * cols;
            for s in 0..spatial {
                let sq: f32 = (0..channels)
                    .map(|c| {
                        let v = data[base + c * spatial + s];
                        v * v
                    })
                    .sum();
                let norm = sq.sqrt();
                let denom = match self.epsilon {
                    Some(eps) => norm.max(eps),
                    None => norm,
                };
                out.push((norm, denom));
            }
        }
        out
    }
}

impl Module for ChannelL2Norm {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard(input)?;
        let (rows, cols) = input.shape();
        let spatial = self.spatial;
        let denominators = self.denominators(input);
        let mut output = input.clone();
        let out = output.data_mut();
        for r in 0..rows {
            for c in 0..self.channels {
                for s in 0..spatial {
                    out[r * cols + c * spatial + s] /= denominators[r * spatial + s].1;
                }
            }
        }
        Ok(output)
    }

    /// For unclamped locations `dx = (g - y (y . g)) / norm`; clamped ones
    /// are a plain scaling so `dx = g / eps`.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard(input)?;
        if input.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let (rows, cols) = input.shape();
        let (channels, spatial) = (self.channels, self.spatial);
        let denominators = self.denominators(input);
        let x = input.data();
        let g = grad_output.data();
        let mut grad = Tensor::zeros(rows, cols)?;
        {
            let out = grad.data_mut();
            for r in 0..rows {
                let base = r * cols;
                for s in 0..spatial {
                    let (norm, denom) = denominators[r * spatial + s];
                    if denom > norm {
                        for c in 0..channels {
                            let idx = base + c * spatial + s;
                            out[idx] = g[idx] / denom;
                        }
                        continue;
                    }
                    let mut dot = 0.0f32;
                    for c in 0..channels {
                        let idx = base + c * spatial + s;
                        dot += x[idx] / norm * g[idx];
                    }
                    for c in 0..channels {
                        let idx = base + c * spatial + s;
                        let y = x[idx] / norm;
                        out[idx] = (g[idx] - y * dot) / norm;
                    }
                }
            }
        }
        Ok(grad)
    }
}

impl Parameterized for ChannelL2Norm {
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
    fn every_location_has_unit_norm() {
        let norm = ChannelL2Norm::new(16, (3, 2), None).unwrap();
        let input = Tensor::random_normal(2, 16 * 6, 0.0, 3.0, Some(7)).unwrap();
        let out = norm.forward(&input).unwrap();
        for r in 0..2 {
            let row = out.row(r).unwrap();
            for s in 0..6 {
                let sq: f32 = (0..16).map(|c| row[c * 6 + s] * row[c * 6 + s]).sum();
                assert_abs_diff_eq!(sq.sqrt(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn zero_vectors_are_unguarded_by_default() {
        let norm = ChannelL2Norm::new(2, (1, 1), None).unwrap();
        let out = norm.forward(&Tensor::zeros(1, 2).unwrap()).unwrap();
        assert!(out.data().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn epsilon_clamps_the_denominator() {
        let norm = ChannelL2Norm::new(2, (1, 1), Some(1e-6)).unwrap();
        let out = norm.forward(&Tensor::zeros(1, 2).unwrap()).unwrap();
        assert_eq!(out.data(), &[0.0, 0.0]);
        assert!(ChannelL2Norm::new(2, (1, 1), Some(0.0)).is_err());
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut norm = ChannelL2Norm::new(3, (1, 2), None).unwrap();
        let input = Tensor::random_normal(1, 6, 0.0, 1.0, Some(5)).unwrap();
        let cotangent = Tensor::random_normal(1, 6, 0.0, 1.0, Some(6)).unwrap();
        let grad = norm.backward(&input, &cotangent).unwrap();
        let objective = |x: &Tensor| -> f32 {
            let y = norm.forward(x).unwrap();
            y.data().iter().zip(cotangent.data()).map(|(a, b)| a * b).sum()
        };
        let eps = 1e-3;
        for i in 0..6 {
            let mut plus = input.clone();
            plus.data_mut()[i] += eps;
            let mut minus = input.clone();
            minus.data_mut()[i] -= eps;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(numeric, grad.data()[i], epsilon = 5e-3);
        }
    }
}
