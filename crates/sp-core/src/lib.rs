// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Core runtime pieces shared by the SpiralPoint layers: the custom operator
//! registry (forward functions paired with hand-written gradient rules) and
//! the telemetry entry points.

pub mod ops;
pub mod telemetry;

pub use sp_tensor::{PureResult, Tensor, TensorError};
