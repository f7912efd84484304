// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::init;
use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor, TensorError};
use rayon::prelude::*;
use sp_config::determinism;
use tracing::debug;

fn validate_positive(value: usize, label: &'static str) -> PureResult<()> {
    if value == 0 {
        return Err(TensorError::InvalidValue { label });
    }
    Ok(())
}

fn dilated_extent(size: usize, dilation: usize) -> usize {
    (size - 1) * dilation + 1
}

/// Output extent of a sliding window along one axis, flooring partial windows.
pub fn window_output_extent(
    extent: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> PureResult<usize> {
    let effective = dilated_extent(kernel, dilation);
    if extent + 2 * padding < effective {
        return Err(TensorError::InvalidDimensions {
            rows: extent + 2 * padding,
            cols: effective,
        });
    }
    Ok((extent + 2 * padding - effective) / stride + 1)
}

/// Range of output coordinates `o` for which `o * stride + offset` lands in `[0, extent)`.
fn valid_outputs(extent: usize, out_extent: usize, stride: usize, offset: isize) -> (usize, usize) {
    let lo = if offset >= 0 {
        0
    } else {
        ((-offset) as usize).div_ceil(stride)
    };
    let limit = extent as isize - offset;
    let hi = if limit <= 0 {
        0
    } else {
        (limit as usize).div_ceil(stride)
    };
    (lo.min(out_extent), hi.min(out_extent))
}

/// Runs `kernel` once per contiguous `plane`-sized chunk of `buffer`, in
/// parallel unless the determinism config pins reduction order.
fn for_each_plane<F>(buffer: &mut [f32], plane: usize, kernel: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if determinism::lock_reduction_order() {
        buffer
            .chunks_mut(plane)
            .enumerate()
            .for_each(|(index, chunk)| kernel(index, chunk));
    } else {
        buffer
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(index, chunk)| kernel(index, chunk));
    }
}

/// Spatial bookkeeping shared by the forward and backward kernels.
#[derive(Clone, Copy, Debug)]
struct ConvGeometry {
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    dilation: (usize, usize),
    input_hw: (usize, usize),
    output_hw: (usize, usize),
}

/// Valid output window for a single kernel tap `(kh, kw)`.
#[derive(Clone, Copy, Debug)]
struct Tap {
    rows: (usize, usize),
    cols: (usize, usize),
    offset: (isize, isize),
}

impl ConvGeometry {
    fn tap(&self, kh: usize, kw: usize) -> Tap {
        let offset_h = (kh * self.dilation.0) as isize - self.padding.0 as isize;
        let offset_w = (kw * self.dilation.1) as isize - self.padding.1 as isize;
        Tap {
            rows: valid_outputs(self.input_hw.0, self.output_hw.0, self.stride.0, offset_h),
            cols: valid_outputs(self.input_hw.1, self.output_hw.1, self.stride.1, offset_w),
            offset: (offset_h, offset_w),
        }
    }

    /// Calls `f(output_index, input_index)` for every in-bounds pair of the tap.
    #[inline]
    fn for_each_pair(&self, tap: &Tap, mut f: impl FnMut(usize, usize)) {
        let (_, w) = self.input_hw;
        let (_, ow) = self.output_hw;
        for oy in tap.rows.0..tap.rows.1 {
            let iy = ((oy * self.stride.0) as isize + tap.offset.0) as usize;
            let out_base = oy * ow;
            let in_base = iy * w;
            for ox in tap.cols.0..tap.cols.1 {
                let ix = ((ox * self.stride.1) as isize + tap.offset.1) as usize;
                f(out_base + ox, in_base + ix);
            }
        }
    }
}

/// Two-dimensional convolution operating on `(batch, channels * height * width)` tensors.
///
/// Weights are stored as `(out_channels, in_channels * kh * kw)` and are
/// initialised with Kaiming-normal (fan-out, ReLU gain); biases use the
/// fan-in bounded uniform default.
#[derive(Debug)]
pub struct Conv2d {
    name: String,
    weight: Parameter,
    bias: Parameter,
    in_channels: usize,
    out_channels: usize,
    geometry: ConvGeometry,
}

impl Conv2d {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        dilation: (usize, usize),
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        Self::seeded(
            name,
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            dilation,
            input_hw,
            None,
        )
    }

    /// Like [`Conv2d::new`] but draws the parameters from `seed`, mixed with
    /// the parameter names so every layer of a network gets its own stream.
    /// Weights are drawn exactly once.
    #[allow(clippy::too_many_arguments)]
    pub fn seeded(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        dilation: (usize, usize),
        input_hw: (usize, usize),
        seed: Option<u64>,
    ) -> PureResult<Self> {
        validate_positive(in_channels, "in_channels")?;
        validate_positive(out_channels, "out_channels")?;
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        validate_positive(stride.0, "stride_h")?;
        validate_positive(stride.1, "stride_w")?;
        validate_positive(dilation.0, "dilation_h")?;
        validate_positive(dilation.1, "dilation_w")?;
        validate_positive(input_hw.0, "input_height")?;
        validate_positive(input_hw.1, "input_width")?;
        let output_hw = (
            window_output_extent(input_hw.0, kernel.0, stride.0, padding.0, dilation.0)?,
            window_output_extent(input_hw.1, kernel.1, stride.1, padding.1, dilation.1)?,
        );
        let name = name.into();
        debug!(
            layer = %name,
            in_channels,
            out_channels,
            ?kernel,
            ?input_hw,
            ?output_hw,
            "conv2d"
        );
        let weight = init::kaiming_normal_fan_out(
            out_channels,
            in_channels,
            kernel,
            init::layer_seed(seed, &format!("{name}::weight")),
        )?;
        let bias = init::conv_bias_uniform(
            out_channels,
            in_channels,
            kernel,
            init::layer_seed(seed, &format!("{name}::bias")),
        )?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
            name,
            in_channels,
            out_channels,
            geometry: ConvGeometry {
                kernel,
                stride,
                padding,
                dilation,
                input_hw,
                output_hw,
            },
        })
    }

    /// 3x3, stride 1, padding 1 convolution that preserves spatial size.
    pub fn same3x3(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        Self::same3x3_seeded(name, in_channels, out_channels, input_hw, None)
    }

    pub fn same3x3_seeded(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        input_hw: (usize, usize),
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::seeded(
            name,
            in_channels,
            out_channels,
            (3, 3),
            (1, 1),
            (1, 1),
            (1, 1),
            input_hw,
            seed,
        )
    }

    /// 1x1 pointwise convolution.
    pub fn pointwise(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        Self::pointwise_seeded(name, in_channels, out_channels, input_hw, None)
    }

    pub fn pointwise_seeded(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        input_hw: (usize, usize),
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::seeded(
            name,
            in_channels,
            out_channels,
            (1, 1),
            (1, 1),
            (0, 0),
            (1, 1),
            input_hw,
            seed,
        )
    }

    /// Re-initialises weight and bias. Explicit seeds are mixed with the
    /// parameter names so every layer of a network draws its own stream.
    pub fn reset_parameters(&mut self, seed: Option<u64>) -> PureResult<()> {
        let kernel = self.geometry.kernel;
        let weight = init::kaiming_normal_fan_out(
            self.out_channels,
            self.in_channels,
            kernel,
            init::layer_seed(seed, self.weight.name()),
        )?;
        let bias = init::conv_bias_uniform(
            self.out_channels,
            self.in_channels,
            kernel,
            init::layer_seed(seed, self.bias.name()),
        )?;
        self.weight.load_value(&weight)?;
        self.bias.load_value(&bias)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.geometry.input_hw
    }

    pub fn output_hw(&self) -> (usize, usize) {
        self.geometry.output_hw
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    fn input_cols(&self) -> usize {
        self.in_channels * self.geometry.input_hw.0 * self.geometry.input_hw.1
    }

    fn output_cols(&self) -> usize {
        self.out_channels * self.geometry.output_hw.0 * self.geometry.output_hw.1
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<usize> {
        let (batch, cols) = input.shape();
        let expected_cols = self.input_cols();
        if cols != expected_cols {
            return Err(TensorError::ShapeMismatch {
                left: (batch, cols),
                right: (batch, expected_cols),
            });
        }
        Ok(batch)
    }

    fn forward_cpu(&self, input: &Tensor, batch: usize) -> PureResult<Tensor> {
        let geometry = self.geometry;
        let (kh_n, kw_n) = geometry.kernel;
        let in_cols = self.input_cols();
        let out_cols = self.output_cols();
        let spatial_in = geometry.input_hw.0 * geometry.input_hw.1;
        let spatial_out = geometry.output_hw.0 * geometry.output_hw.1;
        let span = self.in_channels * kh_n * kw_n;
        let in_channels = self.in_channels;
        let weight = self.weight.value().data();
        let bias = self.bias.value().data();
        let mut output = Tensor::zeros(batch, out_cols)?;
        {
            let input_data = input.data();
            let output_data = output.data_mut();
            for b in 0..batch {
                let in_row = &input_data[b * in_cols..(b + 1) * in_cols];
                let out_row = &mut output_data[b * out_cols..(b + 1) * out_cols];
                for_each_plane(out_row, spatial_out, |oc, out_plane| {
                    out_plane.fill(bias[oc]);
                    let filters = &weight[oc * span..(oc + 1) * span];
                    for ic in 0..in_channels {
                        let in_plane = &in_row[ic * spatial_in..(ic + 1) * spatial_in];
                        for kh in 0..kh_n {
                            for kw in 0..kw_n {
                                let value = filters[(ic * kh_n + kh) * kw_n + kw];
                                let tap = geometry.tap(kh, kw);
                                geometry.for_each_pair(&tap, |o, i| {
                                    out_plane[o] += value * in_plane[i];
                                });
                            }
                        }
                    }
                });
            }
        }
        Ok(output)
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        self.forward_cpu(input, batch)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let batch = self.guard_input(input)?;
        let out_cols = self.output_cols();
        if grad_output.shape() != (batch, out_cols) {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: (batch, out_cols),
            });
        }
        let geometry = self.geometry;
        let (kh_n, kw_n) = geometry.kernel;
        let in_cols = self.input_cols();
        let spatial_in = geometry.input_hw.0 * geometry.input_hw.1;
        let spatial_out = geometry.output_hw.0 * geometry.output_hw.1;
        let span = self.in_channels * kh_n * kw_n;
        let in_channels = self.in_channels;
        let out_channels = self.out_channels;

        let mut grad_weight = vec![0.0f32; out_channels * span];
        let mut grad_bias = vec![0.0f32; out_channels];
        let mut grad_input = Tensor::zeros(batch, in_cols)?;
        {
            let weight = self.weight.value().data();
            let input_data = input.data();
            let grad_data = grad_output.data();
            let grad_input_data = grad_input.data_mut();
            for b in 0..batch {
                let in_row = &input_data[b * in_cols..(b + 1) * in_cols];
                let grad_row = &grad_data[b * out_cols..(b + 1) * out_cols];

                for_each_plane(&mut grad_weight, span, |oc, filters| {
                    let grad_plane = &grad_row[oc * spatial_out..(oc + 1) * spatial_out];
                    for ic in 0..in_channels {
                        let in_plane = &in_row[ic * spatial_in..(ic + 1) * spatial_in];
                        for kh in 0..kh_n {
                            for kw in 0..kw_n {
                                let tap = geometry.tap(kh, kw);
                                let mut acc = 0.0f32;
                                geometry.for_each_pair(&tap, |o, i| {
                                    acc += grad_plane[o] * in_plane[i];
                                });
                                filters[(ic * kh_n + kh) * kw_n + kw] += acc;
                            }
                        }
                    }
                });
                for (oc, slot) in grad_bias.iter_mut().enumerate() {
                    let grad_plane = &grad_row[oc * spatial_out..(oc + 1) * spatial_out];
                    *slot += grad_plane.iter().sum::<f32>();
                }

                let grad_in_row = &mut grad_input_data[b * in_cols..(b + 1) * in_cols];
                for_each_plane(grad_in_row, spatial_in, |ic, grad_in_plane| {
                    for oc in 0..out_channels {
                        let grad_plane = &grad_row[oc * spatial_out..(oc + 1) * spatial_out];
                        let filters = &weight[oc * span..(oc + 1) * span];
                        for kh in 0..kh_n {
                            for kw in 0..kw_n {
                                let value = filters[(ic * kh_n + kh) * kw_n + kw];
                                let tap = geometry.tap(kh, kw);
                                geometry.for_each_pair(&tap, |o, i| {
                                    grad_in_plane[i] += value * grad_plane[o];
                                });
                            }
                        }
                    }
                });
            }
        }
        let inv_batch = 1.0 / batch as f32;
        let grad_weight = Tensor::from_vec(out_channels, span, grad_weight)?.scale(inv_batch)?;
        let grad_bias = Tensor::from_vec(1, out_channels, grad_bias)?.scale(inv_batch)?;
        self.weight.accumulate_euclidean(&grad_weight)?;
        self.bias.accumulate_euclidean(&grad_bias)?;
        Ok(grad_input)
    }
}

impl Parameterized for Conv2d {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}

/// Max pooling over 2D feature maps. Partial windows at the border are dropped.
#[derive(Debug)]
pub struct MaxPool2d {
    channels: usize,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    input_hw: (usize, usize),
    output_hw: (usize, usize),
}

impl MaxPool2d {
    pub fn new(
        channels: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        validate_positive(channels, "channels")?;
        validate_positive(kernel.0, "kernel_h")?;
        validate_positive(kernel.1, "kernel_w")?;
        validate_positive(stride.0, "stride_h")?;
        validate_positive(stride.1, "stride_w")?;
        validate_positive(input_hw.0, "input_height")?;
        validate_positive(input_hw.1, "input_width")?;
        let output_hw = (
            window_output_extent(input_hw.0, kernel.0, stride.0, padding.0, 1)?,
            window_output_extent(input_hw.1, kernel.1, stride.1, padding.1, 1)?,
        );
        Ok(Self {
            channels,
            kernel,
            stride,
            padding,
            input_hw,
            output_hw,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn output_hw(&self) -> (usize, usize) {
        self.output_hw
    }

    /// Computes the pooled tensor alongside, for every output element, the
    /// flat in-row index of the input element that won the window.
    fn pool_with_indices(&self, input: &Tensor) -> PureResult<(Tensor, Vec<Option<usize>>)> {
        let (batch, cols) = input.shape();
        let (h, w) = self.input_hw;
        let (oh, ow) = self.output_hw;
        let expected = self.channels * h * w;
        if cols != expected {
            return Err(TensorError::ShapeMismatch {
                left: (batch, cols),
                right: (batch, expected),
            });
        }
        let out_cols = self.channels * oh * ow;
        let mut out = Tensor::zeros(batch, out_cols)?;
        let mut indices = vec![None; batch * out_cols];
        {
            let input_data = input.data();
            let out_data = out.data_mut();
            for b in 0..batch {
                let row = &input_data[b * cols..(b + 1) * cols];
                for c in 0..self.channels {
                    let channel_offset = c * h * w;
                    for oh_idx in 0..oh {
                        for ow_idx in 0..ow {
                            let mut best = f32::NEG_INFINITY;
                            let mut best_idx = None;
                            for kh in 0..self.kernel.0 {
                                for kw in 0..self.kernel.1 {
                                    let pos_h = oh_idx * self.stride.0 + kh;
                                    let pos_w = ow_idx * self.stride.1 + kw;
                                    if pos_h < self.padding.0 || pos_w < self.padding.1 {
                                        continue;
                                    }
                                    let idx_h = pos_h - self.padding.0;
                                    let idx_w = pos_w - self.padding.1;
                                    if idx_h >= h || idx_w >= w {
                                        continue;
                                    }
                                    let index = channel_offset + idx_h * w + idx_w;
                                    let value = row[index];
                                    if best_idx.is_none() || value > best {
                                        best = value;
                                        best_idx = Some(index);
                                    }
                                }
                            }
                            let out_index = b * out_cols + c * oh * ow + oh_idx * ow + ow_idx;
                            out_data[out_index] = if best_idx.is_some() { best } else { 0.0 };
                            indices[out_index] = best_idx;
                        }
                    }
                }
            }
        }
        Ok((out, indices))
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        self.pool_with_indices(input).map(|(out, _)| out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let (pooled, indices) = self.pool_with_indices(input)?;
        if grad_output.shape() != pooled.shape() {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: pooled.shape(),
            });
        }
        let (batch, in_cols) = input.shape();
        let out_cols = pooled.shape().1;
        let mut grad_input = Tensor::zeros(batch, in_cols)?;
        {
            let grad_data = grad_output.data();
            let grad_input_data = grad_input.data_mut();
            for b in 0..batch {
                for idx in 0..out_cols {
                    if let Some(input_index) = indices[b * out_cols + idx] {
                        grad_input_data[b * in_cols + input_index] += grad_data[b * out_cols + idx];
                    }
                }
            }
        }
        Ok(grad_input)
    }
}

impl Parameterized for MaxPool2d {
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

    fn reference_conv(conv: &Conv2d, input: &Tensor) -> Vec<f32> {
        let g = conv.geometry;
        let (h, w) = g.input_hw;
        let (oh, ow) = g.output_hw;
        let (kh_n, kw_n) = g.kernel;
        let weight = conv.weight.value().data();
        let bias = conv.bias.value().data();
        let (batch, cols) = input.shape();
        let mut out = Vec::new();
        for b in 0..batch {
            let row = &input.data()[b * cols..(b + 1) * cols];
            for oc in 0..conv.out_channels {
                for y in 0..oh {
                    for x in 0..ow {
                        let mut acc = bias[oc];
                        for ic in 0..conv.in_channels {
                            for kh in 0..kh_n {
                                for kw in 0..kw_n {
                                    let iy = (y * g.stride.0 + kh * g.dilation.0) as isize
                                        - g.padding.0 as isize;
                                    let ix = (x * g.stride.1 + kw * g.dilation.1) as isize
                                        - g.padding.1 as isize;
                                    if iy < 0 || ix < 0 || iy >= h as isize || ix >= w as isize {
                                        continue;
                                    }
                                    let widx = oc * conv.in_channels * kh_n * kw_n
                                        + (ic * kh_n + kh) * kw_n
                                        + kw;
                                    acc += weight[widx]
                                        * row[ic * h * w + iy as usize * w + ix as usize];
                                }
                            }
                        }
                        out.push(acc);
                    }
                }
            }
        }
        out
    }

    fn weighted_sum(output: &Tensor, weights: &Tensor) -> f32 {
        output
            .data()
            .iter()
            .zip(weights.data().iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    #[test]
    fn conv2d_backward_matches_manual_kernel11() {
        let mut conv = Conv2d::pointwise("conv", 1, 1, (2, 2)).unwrap();
        conv.weight.value_mut().data_mut()[0] = 1.5;
        conv.bias.value_mut().data_mut()[0] = 0.0;
        let input = Tensor::from_vec(1, 4, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let grad_output = Tensor::from_vec(1, 4, vec![1.0; 4]).unwrap();
        let grad_input = conv.backward(&input, &grad_output).unwrap();
        assert_eq!(grad_input.shape(), input.shape());
        for &value in grad_input.data() {
            assert!((value - 1.5).abs() < 1e-6);
        }
        let weight_grad = conv.weight.gradient().unwrap();
        assert!((weight_grad.data()[0] - 10.0).abs() < 1e-6);
        let bias_grad = conv.bias.gradient().unwrap();
        assert!((bias_grad.data()[0] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn conv2d_forward_matches_direct_reference() {
        let conv = Conv2d::same3x3_seeded("conv", 2, 3, (5, 4), Some(4)).unwrap();
        let input = Tensor::random_normal(2, 2 * 5 * 4, 0.0, 1.0, Some(8)).unwrap();
        let output = conv.forward(&input).unwrap();
        assert_eq!(output.shape(), (2, 3 * 5 * 4));
        for (a, b) in output.data().iter().zip(reference_conv(&conv, &input)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn conv2d_strided_dilated_forward_matches_reference() {
        let conv = Conv2d::seeded(
            "conv",
            1,
            2,
            (3, 3),
            (2, 2),
            (1, 1),
            (2, 2),
            (9, 7),
            Some(5),
        )
        .unwrap();
        assert_eq!(conv.output_hw(), (4, 3));
        let input = Tensor::random_normal(1, 63, 0.0, 1.0, Some(2)).unwrap();
        let output = conv.forward(&input).unwrap();
        for (a, b) in output.data().iter().zip(reference_conv(&conv, &input)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn conv2d_gradients_match_finite_differences() {
        let mut conv = Conv2d::same3x3_seeded("conv", 2, 2, (4, 4), Some(21)).unwrap();
        let batch = 2;
        let input = Tensor::random_normal(batch, 2 * 16, 0.0, 1.0, Some(3)).unwrap();
        let cotangent = Tensor::random_normal(batch, 2 * 16, 0.0, 1.0, Some(4)).unwrap();
        let grad_input = conv.backward(&input, &cotangent).unwrap();
        let eps = 1e-2f32;

        for &index in &[0usize, 5, 17, 31, 40, 63] {
            let mut plus = input.clone();
            plus.data_mut()[index] += eps;
            let mut minus = input.clone();
            minus.data_mut()[index] -= eps;
            let numeric = (weighted_sum(&conv.forward(&plus).unwrap(), &cotangent)
                - weighted_sum(&conv.forward(&minus).unwrap(), &cotangent))
                / (2.0 * eps);
            assert!((numeric - grad_input.data()[index]).abs() < 1e-2);
        }

        let weight_grad = conv.weight.gradient().unwrap().clone();
        for &index in &[0usize, 8, 13, 35] {
            let original = conv.weight.value().data()[index];
            conv.weight.value_mut().data_mut()[index] = original + eps;
            let up = weighted_sum(&conv.forward(&input).unwrap(), &cotangent);
            conv.weight.value_mut().data_mut()[index] = original - eps;
            let down = weighted_sum(&conv.forward(&input).unwrap(), &cotangent);
            conv.weight.value_mut().data_mut()[index] = original;
            // parameter gradients are averaged over the batch
            let numeric = (up - down) / (2.0 * eps) / batch as f32;
            assert!((numeric - weight_grad.data()[index]).abs() < 1e-2);
        }
    }

    #[test]
    fn conv2d_rejects_mismatched_input() {
        let conv = Conv2d::same3x3("conv", 1, 4, (8, 8)).unwrap();
        let input = Tensor::zeros(1, 63).unwrap();
        assert!(matches!(
            conv.forward(&input),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(Conv2d::same3x3("conv", 0, 4, (8, 8)).is_err());
    }

    #[test]
    fn seeded_convolutions_are_reproducible_and_named() {
        let a = Conv2d::same3x3_seeded("conv1a", 1, 8, (8, 8), Some(9)).unwrap();
        let b = Conv2d::same3x3_seeded("conv1a", 1, 8, (8, 8), Some(9)).unwrap();
        assert_eq!(a.state_dict().unwrap(), b.state_dict().unwrap());
        assert_eq!(a.weight().name(), "conv1a::weight");
        assert_eq!(a.bias().name(), "conv1a::bias");
    }

    #[test]
    fn seeded_constructor_draws_parameters_once_from_the_seed() {
        let conv = Conv2d::pointwise_seeded("convPb", 4, 6, (3, 3), Some(11)).unwrap();
        let weight = init::kaiming_normal_fan_out(
            6,
            4,
            (1, 1),
            init::layer_seed(Some(11), "convPb::weight"),
        )
        .unwrap();
        let bias =
            init::conv_bias_uniform(6, 4, (1, 1), init::layer_seed(Some(11), "convPb::bias"))
                .unwrap();
        assert_eq!(conv.weight().value(), &weight);
        assert_eq!(conv.bias().value(), &bias);

        let mut redrawn = Conv2d::pointwise("convPb", 4, 6, (3, 3)).unwrap();
        redrawn.reset_parameters(Some(11)).unwrap();
        assert_eq!(redrawn.state_dict().unwrap(), conv.state_dict().unwrap());
    }

    #[test]
    fn max_pool_picks_window_maximum() {
        let pool = MaxPool2d::new(1, (2, 2), (2, 2), (0, 0), (2, 2)).unwrap();
        let input = Tensor::from_vec(1, 4, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = pool.forward(&input).unwrap();
        assert_eq!(out.data(), &[4.0]);
    }

    #[test]
    fn max_pool_propagates_gradients_to_maxima() {
        let mut pool = MaxPool2d::new(1, (2, 2), (1, 1), (0, 0), (3, 3)).unwrap();
        let input =
            Tensor::from_vec(1, 9, vec![1.0, 3.0, 2.0, 4.0, 6.0, 5.0, 0.0, -1.0, -2.0]).unwrap();
        let grad_output = Tensor::from_vec(1, 4, vec![0.5, -1.0, 2.0, 3.0]).unwrap();
        let grad_input = pool.backward(&input, &grad_output).unwrap();
        let mut expected = vec![0.0f32; 9];
        expected[4] = 0.5 - 1.0 + 2.0 + 3.0;
        for (&value, &target) in grad_input.data().iter().zip(expected.iter()) {
            assert!((value - target).abs() < 1e-6);
        }
    }

    #[test]
    fn max_pool_floors_odd_extents() {
        let pool = MaxPool2d::new(2, (2, 2), (2, 2), (0, 0), (5, 3)).unwrap();
        assert_eq!(pool.output_hw(), (2, 1));
        let input = Tensor::from_fn(1, 2 * 15, |_, c| c as f32).unwrap();
        let out = pool.forward(&input).unwrap();
        // channel 0 windows end at (1,1) and (3,1); channel 1 is offset by 15
        assert_eq!(out.data(), &[4.0, 10.0, 19.0, 25.0]);
    }
}
