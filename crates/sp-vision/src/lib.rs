// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! SuperPoint keypoint detection and description.
//!
//! A grey image batch of shape `(batch, H * W)` passes through a shared
//! VGG-style encoder down to an `(H/8, W/8)` cell grid. The detector head
//! scores 64 pixel positions plus a "no keypoint" bin per cell and the
//! descriptor head emits a 256-d vector per cell, L2-normalised and, for the
//! binary/pairwise variant, sign-quantised with a straight-through gradient.
//!
//! ```no_run
//! use sp_tensor::Tensor;
//! use sp_vision::{SuperPointConfig, SuperPointNet};
//!
//! # fn main() -> sp_tensor::PureResult<()> {
//! let net = SuperPointNet::new(SuperPointConfig::default())?;
//! let image = Tensor::random_uniform(1, 240 * 320, 0.0, 1.0, Some(0))?;
//! let (logits, descriptor, prob, feature) = net.forward(&image)?.into_tuple();
//! assert_eq!(descriptor.dims(), [1, 256, 30, 40]);
//! # let _ = (logits, prob, feature);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod models;

pub use config::{
    ForwardMode, LossType, MagicPointConfig, OutputType, SuperPointConfig, VariantError,
};
pub use models::{
    DetectorGrads, DetectorOutput, FeatureMap, MagicPointNet, SuperPointEncoder,
    SuperPointGrads, SuperPointNet, SuperPointOutput,
};
pub use sp_nn::Parameterized;
pub use sp_tensor::{PureResult, Tensor, TensorError};
