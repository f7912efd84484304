// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod encoder;
pub mod feature_map;
pub mod heads;
pub mod superpoint;
pub mod utils;

pub use encoder::{EncoderStage, SuperPointEncoder, ENCODER_WIDTHS};
pub use feature_map::FeatureMap;
pub use heads::{DescriptorHead, DetectorHead, CELL_POSITIONS, DESCRIPTOR_DIM, DETECTOR_BINS};
pub use superpoint::{
    DetectorGrads, DetectorOutput, MagicPointNet, SuperPointGrads, SuperPointNet,
    SuperPointOutput,
};
pub use utils::{cell_grid, CELL_SIZE};
