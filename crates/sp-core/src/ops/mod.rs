// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Registered tensor operators with explicit gradient rules.

pub mod operator_registry;
pub mod sign_ste;

pub use operator_registry::{
    global_operator_registry, GradientFn, OperatorBuilder, OperatorFn, OperatorMetadata,
    OperatorRegistry, OperatorSignature, RegisteredOperator,
};
