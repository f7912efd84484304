// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sp_tensor::{PureResult, Tensor, TensorError};

/// A `(batch, channels * height * width)` tensor tagged with its channel and
/// spatial layout.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    tensor: Tensor,
    channels: usize,
    hw: (usize, usize),
}

impl FeatureMap {
    pub fn new(tensor: Tensor, channels: usize, hw: (usize, usize)) -> PureResult<Self> {
        let (rows, cols) = tensor.shape();
        let expected = channels * hw.0 * hw.1;
        if cols != expected {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, expected),
            });
        }
        Ok(Self {
            tensor,
            channels,
            hw,
        })
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn batch(&self) -> usize {
        self.tensor.shape().0
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn hw(&self) -> (usize, usize) {
        self.hw
    }

    /// `[batch, channels, height, width]`.
    pub fn dims(&self) -> [usize; 4] {
        [self.batch(), self.channels, self.hw.0, self.hw.1]
    }

    pub fn at(&self, batch: usize, channel: usize, y: usize, x: usize) -> PureResult<f32> {
        let [b, c, h, w] = self.dims();
        if batch >= b || channel >= c || y >= h || x >= w {
            return Err(TensorError::InvalidDimensions {
                rows: batch,
                cols: channel * h * w + y * w + x,
            });
        }
        let row = self.tensor.row(batch)?;
        Ok(row[channel * h * w + y * w + x])
    }

    /// Channel vector at one spatial location, e.g. a descriptor or a cell's
    /// 64 probabilities.
    pub fn location(&self, batch: usize, y: usize, x: usize) -> PureResult<Vec<f32>> {
        let [b, _, h, w] = self.dims();
        if batch >= b || y >= h || x >= w {
            return Err(TensorError::InvalidDimensions { rows: y, cols: x });
        }
        let row = self.tensor.row(batch)?;
        let spatial = h * w;
        let offset = y * w + x;
        Ok((0..self.channels)
            .map(|c| row[c * spatial + offset])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_follows_channel_major_layout() {
        let tensor = Tensor::from_vec(1, 12, (0..12).map(|v| v as f32).collect()).unwrap();
        let map = FeatureMap::new(tensor, 3, (2, 2)).unwrap();
        assert_eq!(map.dims(), [1, 3, 2, 2]);
        assert_eq!(map.at(0, 2, 1, 0).unwrap(), 10.0);
        assert_eq!(map.location(0, 0, 1).unwrap(), vec![1.0, 5.0, 9.0]);
        assert!(map.at(0, 3, 0, 0).is_err());
    }

    #[test]
    fn rejects_inconsistent_layout() {
        let tensor = Tensor::zeros(1, 10).unwrap();
        assert!(FeatureMap::new(tensor, 3, (2, 2)).is_err());
    }
}
