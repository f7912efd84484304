// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Construction-time configuration for the keypoint networks.

use serde::{Deserialize, Serialize};
use sp_tensor::{PureResult, TensorError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Descriptor encoding requested from [`crate::models::SuperPointNet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Float,
    Binary,
}

/// Training objective the descriptor is meant for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LossType {
    #[default]
    Triplet,
    Pairwise,
}

/// Errors raised while resolving a network variant from its names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariantError {
    #[error("unknown output type '{0}' (expected 'float' or 'binary')")]
    UnknownOutputType(String),
    #[error("unknown loss type '{0}' (expected 'triplet' or 'pairwise')")]
    UnknownLossType(String),
}

impl From<VariantError> for TensorError {
    fn from(err: VariantError) -> Self {
        TensorError::InvalidConfiguration {
            message: err.to_string(),
        }
    }
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Float => "float",
            OutputType::Binary => "binary",
        }
    }
}

impl LossType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossType::Triplet => "triplet",
            LossType::Pairwise => "pairwise",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(OutputType::Float),
            "binary" => Ok(OutputType::Binary),
            other => Err(VariantError::UnknownOutputType(other.to_string())),
        }
    }
}

impl FromStr for LossType {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triplet" => Ok(LossType::Triplet),
            "pairwise" => Ok(LossType::Pairwise),
            other => Err(VariantError::UnknownLossType(other.to_string())),
        }
    }
}

/// Forward behaviour selected once at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    /// L2-normalised descriptor alongside the raw descriptor feature.
    FloatTriplet,
    /// Sign-quantised descriptor alongside the normalised feature.
    BinaryPairwise,
}

impl ForwardMode {
    /// Binary output only changes the forward pass when paired with the
    /// pairwise objective; binary+triplet aliases the float path.
    pub fn resolve(output_type: OutputType, loss_type: LossType) -> Self {
        match (output_type, loss_type) {
            (OutputType::Float, _) | (OutputType::Binary, LossType::Triplet) => {
                ForwardMode::FloatTriplet
            }
            (OutputType::Binary, LossType::Pairwise) => ForwardMode::BinaryPairwise,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, ForwardMode::BinaryPairwise)
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMode::FloatTriplet => f.write_str("float/triplet"),
            ForwardMode::BinaryPairwise => f.write_str("binary/pairwise"),
        }
    }
}

fn default_input_hw() -> (usize, usize) {
    (240, 320)
}

/// Configuration of the full detector + descriptor network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuperPointConfig {
    /// Input resolution `(height, width)` the layers are bound to.
    #[serde(default = "default_input_hw")]
    pub input_hw: (usize, usize),
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub loss_type: LossType,
    /// Explicit initialisation seed. `None` defers to the determinism config.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Lower bound on the descriptor norm. `None` divides by the raw norm.
    #[serde(default)]
    pub norm_epsilon: Option<f32>,
}

impl Default for SuperPointConfig {
    fn default() -> Self {
        Self {
            input_hw: default_input_hw(),
            output_type: OutputType::default(),
            loss_type: LossType::default(),
            seed: None,
            norm_epsilon: None,
        }
    }
}

impl SuperPointConfig {
    pub fn new(input_hw: (usize, usize), output_type: OutputType, loss_type: LossType) -> Self {
        Self {
            input_hw,
            output_type,
            loss_type,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_norm_epsilon(mut self, epsilon: f32) -> Self {
        self.norm_epsilon = Some(epsilon);
        self
    }

    pub fn forward_mode(&self) -> ForwardMode {
        ForwardMode::resolve(self.output_type, self.loss_type)
    }

    /// Parses a JSON document. Unknown output or loss names are rejected.
    pub fn from_json_str(raw: &str) -> PureResult<Self> {
        serde_json::from_str(raw).map_err(|err| TensorError::InvalidConfiguration {
            message: format!("failed to parse SuperPoint config: {err}"),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PureResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            TensorError::InvalidConfiguration {
                message: format!("failed to read {}: {err}", path.display()),
            }
        })?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> PureResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| TensorError::InvalidConfiguration {
            message: format!("failed to encode SuperPoint config: {err}"),
        })
    }
}

/// Configuration of the detector-only network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicPointConfig {
    #[serde(default = "default_input_hw")]
    pub input_hw: (usize, usize),
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for MagicPointConfig {
    fn default() -> Self {
        Self {
            input_hw: default_input_hw(),
            seed: None,
        }
    }
}

impl MagicPointConfig {
    pub fn new(input_hw: (usize, usize)) -> Self {
        Self {
            input_hw,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn from_json_str(raw: &str) -> PureResult<Self> {
        serde_json::from_str(raw).map_err(|err| TensorError::InvalidConfiguration {
            message: format!("failed to parse MagicPoint config: {err}"),
        })
    }
}
