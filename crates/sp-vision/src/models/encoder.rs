// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! VGG-style shared encoder.
//!
//! Four stages of two 3x3 convolutions with ReLU; the first three stages end
//! with 2x2 max pooling so a `(H, W)` grey image becomes a 128-channel map on
//! the `(H/8, W/8)` cell grid.

use super::feature_map::FeatureMap;
use super::utils::warn_if_unaligned;
use sp_nn::{Conv2d, MaxPool2d, Module, Parameter, Parameterized, Relu};
use sp_tensor::{PureResult, Tensor};

/// Output widths of the four encoder stages.
pub const ENCODER_WIDTHS: [usize; 4] = [64, 64, 128, 128];

/// Intermediates of one stage, recomputed on demand by `backward`.
struct StageTrace {
    pre_a: Tensor,
    act_a: Tensor,
    pre_b: Tensor,
    act_b: Tensor,
}

/// Two same-size convolutions with ReLU, optionally followed by 2x2 pooling.
#[derive(Debug)]
pub struct EncoderStage {
    conv_a: Conv2d,
    conv_b: Conv2d,
    relu: Relu,
    pool: Option<MaxPool2d>,
}

impl EncoderStage {
    /// Builds stage `index` (1-based). Its convolutions are named
    /// `conv{index}a` and `conv{index}b`.
    pub fn new(
        index: usize,
        in_channels: usize,
        out_channels: usize,
        input_hw: (usize, usize),
        pooled: bool,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let conv_a = Conv2d::same3x3_seeded(
            format!("conv{index}a"),
            in_channels,
            out_channels,
            input_hw,
            seed,
        )?;
        let conv_b = Conv2d::same3x3_seeded(
            format!("conv{index}b"),
            out_channels,
            out_channels,
            input_hw,
            seed,
        )?;
        let pool = if pooled {
            Some(MaxPool2d::new(out_channels, (2, 2), (2, 2), (0, 0), input_hw)?)
        } else {
            None
        };
        Ok(Self {
            conv_a,
            conv_b,
            relu: Relu::new(),
            pool,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.conv_a.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.conv_b.out_channels()
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.conv_a.input_hw()
    }

    pub fn output_hw(&self) -> (usize, usize) {
        match &self.pool {
            Some(pool) => pool.output_hw(),
            None => self.conv_b.output_hw(),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    fn trace(&self, input: &Tensor) -> PureResult<StageTrace> {
        let pre_a = self.conv_a.forward(input)?;
        let act_a = self.relu.forward(&pre_a)?;
        let pre_b = self.conv_b.forward(&act_a)?;
        let act_b = self.relu.forward(&pre_b)?;
        Ok(StageTrace {
            pre_a,
            act_a,
            pre_b,
            act_b,
        })
    }
}

impl Module for EncoderStage {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        match &self.pool {
            Some(pool) => pool.forward(&trace.act_b),
            None => Ok(trace.act_b),
        }
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        let grad_act_b = match &mut self.pool {
            Some(pool) => pool.backward(&trace.act_b, grad_output)?,
            None => grad_output.clone(),
        };
        let grad_pre_b = self.relu.backward(&trace.pre_b, &grad_act_b)?;
        let grad_act_a = self.conv_b.backward(&trace.act_a, &grad_pre_b)?;
        let grad_pre_a = self.relu.backward(&trace.pre_a, &grad_act_a)?;
        self.conv_a.backward(input, &grad_pre_a)
    }
}

impl Parameterized for EncoderStage {
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

/// Shared backbone of the detector and descriptor heads.
#[derive(Debug)]
pub struct SuperPointEncoder {
    stages: Vec<EncoderStage>,
    input_hw: (usize, usize),
}

impl SuperPointEncoder {
    /// Binds the encoder to a `(height, width)` single-channel input.
    pub fn new(input_hw: (usize, usize), seed: Option<u64>) -> PureResult<Self> {
        warn_if_unaligned(input_hw);
        let mut stages = Vec::with_capacity(ENCODER_WIDTHS.len());
        let mut channels = 1;
        let mut hw = input_hw;
        for (i, &width) in ENCODER_WIDTHS.iter().enumerate() {
            let pooled = i + 1 < ENCODER_WIDTHS.len();
            let stage = EncoderStage::new(i + 1, channels, width, hw, pooled, seed)?;
            channels = width;
            hw = stage.output_hw();
            stages.push(stage);
        }
        Ok(Self { stages, input_hw })
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.input_hw
    }

    pub fn output_channels(&self) -> usize {
        ENCODER_WIDTHS[ENCODER_WIDTHS.len() - 1]
    }

    pub fn output_hw(&self) -> (usize, usize) {
        self.stages
            .last()
            .map(EncoderStage::output_hw)
            .unwrap_or(self.input_hw)
    }

    pub fn stages(&self) -> &[EncoderStage] {
        &self.stages
    }

    /// `(channels, (height, width))` produced by every stage.
    pub fn stage_shapes(&self) -> Vec<(usize, (usize, usize))> {
        self.stages
            .iter()
            .map(|stage| (stage.out_channels(), stage.output_hw()))
            .collect()
    }

    /// Forward pass returning the map with its layout attached.
    pub fn encode(&self, input: &Tensor) -> PureResult<FeatureMap> {
        let features = self.forward(input)?;
        FeatureMap::new(features, self.output_channels(), self.output_hw())
    }

    /// Inputs of every stage followed by the final output.
    fn trace(&self, input: &Tensor) -> PureResult<Vec<Tensor>> {
        let mut trace = Vec::with_capacity(self.stages.len() + 1);
        let mut current = input.clone();
        for stage in &self.stages {
            let next = stage.forward(&current)?;
            trace.push(current);
            current = next;
        }
        trace.push(current);
        Ok(trace)
    }
}

impl Module for SuperPointEncoder {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut current = input.clone();
        for stage in &self.stages {
            current = stage.forward(&current)?;
        }
        Ok(current)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.trace(input)?;
        let mut grad = grad_output.clone();
        for (stage, stage_input) in self.stages.iter_mut().zip(trace.iter()).rev() {
            grad = stage.backward(stage_input, &grad)?;
        }
        Ok(grad)
    }
}

impl Parameterized for SuperPointEncoder {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for stage in &self.stages {
            stage.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for stage in &mut self.stages {
            stage.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}
