// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor, TensorError};
use std::ops::Range;

/// Keeps a contiguous range of channels from a feature map. Backward scatters
/// the gradient into the kept slots and leaves zeros for the dropped ones.
#[derive(Debug, Clone)]
pub struct ChannelSlice {
    channels: usize,
    keep: Range<usize>,
    spatial: usize,
}

impl ChannelSlice {
    pub fn new(channels: usize, keep: Range<usize>, hw: (usize, usize)) -> PureResult<Self> {
        let spatial = hw.0 * hw.1;
        if spatial == 0 || keep.is_empty() || keep.end > channels {
            return Err(TensorError::InvalidDimensions {
                rows: channels,
                cols: keep.end,
            });
        }
        Ok(Self {
            channels,
            keep,
            spatial,
        })
    }

    /// Drops the trailing channel, e.g. the "no keypoint" bin of a cell classifier.
    pub fn drop_last(channels: usize, hw: (usize, usize)) -> PureResult<Self> {
        Self::new(channels, 0..channels.saturating_sub(1), hw)
    }

    pub fn kept_channels(&self) -> usize {
        self.keep.len()
    }

    fn guard(&self, tensor: &Tensor, channels: usize) -> PureResult<()> {
        let (rows, cols) = tensor.shape();
        let expected = channels * self.spatial;
        if cols != expected {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, expected),
            });
        }
        Ok(())
    }
}

impl Module for ChannelSlice {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.guard(input, self.channels)?;
        let (rows, cols) = input.shape();
        let start = self.keep.start * self.spatial;
        let end = self.keep.end * self.spatial;
        let mut data = Vec::with_capacity(rows * (end - start));
        for r in 0..rows {
            data.extend_from_slice(&input.data()[r * cols + start..r * cols + end]);
        }
        Tensor::from_vec(rows, end - start, data)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard(input, self.channels)?;
        self.guard(grad_output, self.keep.len())?;
        let (rows, cols) = input.shape();
        let kept_cols = grad_output.shape().1;
        let start = self.keep.start * self.spatial;
        let mut grad = Tensor::zeros(rows, cols)?;
        {
            let out = grad.data_mut();
            for r in 0..rows {
                out[r * cols + start..r * cols + start + kept_cols]
                    .copy_from_slice(&grad_output.data()[r * kept_cols..(r + 1) * kept_cols]);
            }
        }
        Ok(grad)
    }
}

impl Parameterized for ChannelSlice {
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

    #[test]
    fn drop_last_removes_trailing_channel() {
        let slice = ChannelSlice::drop_last(3, (1, 2)).unwrap();
        let input = Tensor::from_vec(2, 6, (0..12).map(|v| v as f32).collect()).unwrap();
        let out = slice.forward(&input).unwrap();
        assert_eq!(out.shape(), (2, 4));
        assert_eq!(out.data(), &[0.0, 1.0, 2.0, 3.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn backward_zero_fills_dropped_channels() {
        let mut slice = ChannelSlice::new(3, 1..3, (1, 1)).unwrap();
        let input = Tensor::zeros(1, 3).unwrap();
        let grad = Tensor::from_vec(1, 2, vec![4.0, 5.0]).unwrap();
        let out = slice.backward(&input, &grad).unwrap();
        assert_eq!(out.data(), &[0.0, 4.0, 5.0]);
    }

    #[test]
    fn rejects_out_of_range_selection() {
        assert!(ChannelSlice::new(3, 2..4, (1, 1)).is_err());
        assert!(ChannelSlice::drop_last(1, (1, 1)).is_err());
    }
}
