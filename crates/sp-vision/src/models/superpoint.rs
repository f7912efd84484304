// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Detector-only and detector + descriptor networks.

use super::encoder::SuperPointEncoder;
use super::feature_map::FeatureMap;
use super::heads::{DescriptorHead, DetectorHead, CELL_POSITIONS, DESCRIPTOR_DIM, DETECTOR_BINS};
use super::utils::grad_or_zeros;
use crate::config::{ForwardMode, LossType, MagicPointConfig, OutputType, SuperPointConfig};
use sp_nn::{ChannelL2Norm, Module, Parameter, Parameterized, SignQuantize};
use sp_tensor::{PureResult, Tensor};
use tracing::{debug_span, info, warn};

/// Detector outputs on the cell grid.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorOutput {
    /// 65-bin scores per cell.
    pub logits: FeatureMap,
    /// Softmax over the 65 bins with the dustbin removed.
    pub prob: FeatureMap,
}

impl DetectorOutput {
    pub fn into_tuple(self) -> (FeatureMap, FeatureMap) {
        (self.logits, self.prob)
    }
}

/// Detector and descriptor outputs.
///
/// In float mode `descriptor` is the unit-norm descriptor and `feature` the
/// raw head output. In binary mode `descriptor` holds the signs of the
/// normalised descriptor and `feature` the normalised descriptor itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SuperPointOutput {
    pub logits: FeatureMap,
    pub descriptor: FeatureMap,
    pub prob: FeatureMap,
    pub feature: FeatureMap,
}

impl SuperPointOutput {
    /// `(logits, descriptor, prob, feature)`.
    pub fn into_tuple(self) -> (FeatureMap, FeatureMap, FeatureMap, FeatureMap) {
        (self.logits, self.descriptor, self.prob, self.feature)
    }
}

/// Upstream gradients for [`MagicPointNet::backward`]. Missing entries count as zero.
#[derive(Clone, Debug, Default)]
pub struct DetectorGrads {
    pub logits: Option<Tensor>,
    pub prob: Option<Tensor>,
}

/// Upstream gradients for [`SuperPointNet::backward`]. Missing entries count as zero.
#[derive(Clone, Debug, Default)]
pub struct SuperPointGrads {
    pub logits: Option<Tensor>,
    pub descriptor: Option<Tensor>,
    pub prob: Option<Tensor>,
    pub feature: Option<Tensor>,
}

fn detector_output(
    logits: Tensor,
    prob: Tensor,
    hw: (usize, usize),
) -> PureResult<DetectorOutput> {
    Ok(DetectorOutput {
        logits: FeatureMap::new(logits, DETECTOR_BINS, hw)?,
        prob: FeatureMap::new(prob, CELL_POSITIONS, hw)?,
    })
}

/// Keypoint-only network: shared encoder followed by the detector head.
#[derive(Debug)]
pub struct MagicPointNet {
    config: MagicPointConfig,
    encoder: SuperPointEncoder,
    detector: DetectorHead,
}

impl MagicPointNet {
    pub fn new(config: MagicPointConfig) -> PureResult<Self> {
        let encoder = SuperPointEncoder::new(config.input_hw, config.seed)?;
        let detector =
            DetectorHead::new(encoder.output_channels(), encoder.output_hw(), config.seed)?;
        info!(
            input_hw = ?config.input_hw,
            cells = ?encoder.output_hw(),
            seeded = config.seed.is_some(),
            "constructed MagicPoint network"
        );
        Ok(Self {
            config,
            encoder,
            detector,
        })
    }

    pub fn config(&self) -> &MagicPointConfig {
        &self.config
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.config.input_hw
    }

    pub fn encoder(&self) -> &SuperPointEncoder {
        &self.encoder
    }

    pub fn detector(&self) -> &DetectorHead {
        &self.detector
    }

    /// Runs the detector on a `(batch, H * W)` grey image batch.
    pub fn forward(&self, input: &Tensor) -> PureResult<DetectorOutput> {
        let span = debug_span!("magicpoint_forward", shape = ?input.shape());
        let _guard = span.enter();
        let features = self.encoder.forward(input)?;
        let (logits, prob) = self.detector.forward(&features)?;
        detector_output(logits, prob, self.encoder.output_hw())
    }

    /// Accumulates parameter gradients and returns the gradient with respect
    /// to `input`.
    pub fn backward(&mut self, input: &Tensor, grads: &DetectorGrads) -> PureResult<Tensor> {
        let span = debug_span!("magicpoint_backward", shape = ?input.shape());
        let _guard = span.enter();
        let features = self.encoder.forward(input)?;
        let grad_features =
            self.detector
                .backward(&features, grads.logits.as_ref(), grads.prob.as_ref())?;
        self.encoder.backward(input, &grad_features)
    }

    /// Re-binds the network to a new input resolution, keeping the weights.
    pub fn set_input_hw(&mut self, input_hw: (usize, usize)) -> PureResult<()> {
        if input_hw == self.config.input_hw {
            return Ok(());
        }
        let state = self.state_dict()?;
        let mut config = self.config.clone();
        config.input_hw = input_hw;
        let mut rebuilt = Self::new(config)?;
        rebuilt.load_state_dict(&state)?;
        *self = rebuilt;
        Ok(())
    }
}

impl Parameterized for MagicPointNet {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters(visitor)?;
        self.detector.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters_mut(visitor)?;
        self.detector.visit_parameters_mut(visitor)
    }
}

/// Full keypoint detector and descriptor network.
///
/// The descriptor variant is fixed at construction by the configured
/// [`ForwardMode`].
#[derive(Debug)]
pub struct SuperPointNet {
    config: SuperPointConfig,
    mode: ForwardMode,
    encoder: SuperPointEncoder,
    detector: DetectorHead,
    descriptor: DescriptorHead,
    normalize: ChannelL2Norm,
    quantize: SignQuantize,
}

impl SuperPointNet {
    pub fn new(config: SuperPointConfig) -> PureResult<Self> {
        let mode = config.forward_mode();
        let encoder = SuperPointEncoder::new(config.input_hw, config.seed)?;
        let (channels, hw) = (encoder.output_channels(), encoder.output_hw());
        let detector = DetectorHead::new(channels, hw, config.seed)?;
        let descriptor = DescriptorHead::new(channels, hw, config.seed)?;
        let normalize = ChannelL2Norm::new(DESCRIPTOR_DIM, hw, config.norm_epsilon)?;
        info!(
            mode = %mode,
            output_type = %config.output_type,
            loss_type = %config.loss_type,
            input_hw = ?config.input_hw,
            cells = ?hw,
            seeded = config.seed.is_some(),
            "constructed SuperPoint network"
        );
        Ok(Self {
            config,
            mode,
            encoder,
            detector,
            descriptor,
            normalize,
            quantize: SignQuantize::new(),
        })
    }

    /// Builds a network from variant names, e.g. `("binary", "pairwise")`.
    ///
    /// The loss name only matters for binary output. With float output an
    /// unrecognised loss is logged and ignored.
    pub fn from_names(
        output_type: &str,
        loss_type: &str,
        input_hw: (usize, usize),
    ) -> PureResult<Self> {
        let output_type: OutputType = output_type.parse()?;
        let loss_type = match loss_type.parse::<LossType>() {
            Ok(loss_type) => loss_type,
            Err(err) if output_type == OutputType::Float => {
                warn!(%err, "float descriptors ignore the loss type");
                LossType::default()
            }
            Err(err) => return Err(err.into()),
        };
        Self::new(SuperPointConfig::new(input_hw, output_type, loss_type))
    }

    pub fn config(&self) -> &SuperPointConfig {
        &self.config
    }

    pub fn mode(&self) -> ForwardMode {
        self.mode
    }

    pub fn input_hw(&self) -> (usize, usize) {
        self.config.input_hw
    }

    pub fn encoder(&self) -> &SuperPointEncoder {
        &self.encoder
    }

    pub fn detector(&self) -> &DetectorHead {
        &self.detector
    }

    pub fn descriptor_head(&self) -> &DescriptorHead {
        &self.descriptor
    }

    /// Runs both heads on a `(batch, H * W)` grey image batch.
    pub fn forward(&self, input: &Tensor) -> PureResult<SuperPointOutput> {
        let span = debug_span!("superpoint_forward", mode = %self.mode, shape = ?input.shape());
        let _guard = span.enter();
        let hw = self.encoder.output_hw();
        let features = self.encoder.forward(input)?;
        let (logits, prob) = self.detector.forward(&features)?;
        let raw = self.descriptor.forward(&features)?;
        let normalized = self.normalize.forward(&raw)?;
        let (descriptor, feature) = match self.mode {
            ForwardMode::FloatTriplet => (normalized, raw),
            ForwardMode::BinaryPairwise => (self.quantize.forward(&normalized)?, normalized),
        };
        let DetectorOutput { logits, prob } = detector_output(logits, prob, hw)?;
        Ok(SuperPointOutput {
            logits,
            descriptor: FeatureMap::new(descriptor, DESCRIPTOR_DIM, hw)?,
            prob,
            feature: FeatureMap::new(feature, DESCRIPTOR_DIM, hw)?,
        })
    }

    /// Accumulates parameter gradients for the supplied output gradients and
    /// returns the gradient with respect to `input`.
    ///
    /// In binary mode the descriptor gradient passes the sign quantizer
    /// unchanged and then joins the `feature` gradient on the normalised
    /// descriptor.
    pub fn backward(&mut self, input: &Tensor, grads: &SuperPointGrads) -> PureResult<Tensor> {
        let span = debug_span!("superpoint_backward", mode = %self.mode, shape = ?input.shape());
        let _guard = span.enter();
        let features = self.encoder.forward(input)?;
        let grad_from_detector =
            self.detector
                .backward(&features, grads.logits.as_ref(), grads.prob.as_ref())?;

        let raw = self.descriptor.forward(&features)?;
        let grad_raw = match self.mode {
            ForwardMode::FloatTriplet => {
                let mut grad = grad_or_zeros(grads.feature.as_ref(), raw.shape())?;
                if let Some(grad_descriptor) = &grads.descriptor {
                    let through_norm = self.normalize.backward(&raw, grad_descriptor)?;
                    grad = grad.add(&through_norm)?;
                }
                grad
            }
            ForwardMode::BinaryPairwise => {
                let mut grad_normalized = grad_or_zeros(grads.feature.as_ref(), raw.shape())?;
                if let Some(grad_descriptor) = &grads.descriptor {
                    let normalized = self.normalize.forward(&raw)?;
                    let through_sign = self.quantize.backward(&normalized, grad_descriptor)?;
                    grad_normalized = grad_normalized.add(&through_sign)?;
                }
                self.normalize.backward(&raw, &grad_normalized)?
            }
        };
        let grad_from_descriptor = self.descriptor.backward(&features, &grad_raw)?;
        let grad_features = grad_from_detector.add(&grad_from_descriptor)?;
        self.encoder.backward(input, &grad_features)
    }

    /// Re-binds the network to a new input resolution, keeping the weights.
    pub fn set_input_hw(&mut self, input_hw: (usize, usize)) -> PureResult<()> {
        if input_hw == self.config.input_hw {
            return Ok(());
        }
        let state = self.state_dict()?;
        let mut config = self.config.clone();
        config.input_hw = input_hw;
        let mut rebuilt = Self::new(config)?;
        rebuilt.load_state_dict(&state)?;
        *self = rebuilt;
        Ok(())
    }
}

impl Parameterized for SuperPointNet {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters(visitor)?;
        self.detector.visit_parameters(visitor)?;
        self.descriptor.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.encoder.visit_parameters_mut(visitor)?;
        self.detector.visit_parameters_mut(visitor)?;
        self.descriptor.visit_parameters_mut(visitor)
    }
}
