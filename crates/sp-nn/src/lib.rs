// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Neural building blocks with explicit forward and backward passes.
//!
//! Activations are `(batch, channels * height * width)` tensors. Spatial
//! layers are bound to an input resolution at construction time, which keeps
//! every shape check a single comparison against the tensor's column count.

pub mod init;
pub mod layers;
pub mod module;

pub use layers::{
    ChannelL2Norm, ChannelSlice, ChannelSoftmax, Conv2d, MaxPool2d, Relu, Sequential,
    SignQuantize,
};
pub use module::{Module, Parameter, Parameterized};

pub use sp_tensor::{PureResult, Tensor, TensorError};
