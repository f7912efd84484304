// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod activation;
pub mod channel;
pub mod conv;
pub mod normalization;
pub mod quantize;
pub mod sequential;
pub mod softmax;

pub use activation::Relu;
pub use channel::ChannelSlice;
pub use conv::{Conv2d, MaxPool2d};
pub use normalization::ChannelL2Norm;
pub use quantize::SignQuantize;
pub use sequential::Sequential;
pub use softmax::ChannelSoftmax;
