// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Sign quantization with a straight-through gradient.
//!
//! Forward maps every element to `-1`, `0` or `+1`. Backward returns the
//! incoming gradient untouched, whatever the forward input was. The pair is
//! registered as a single operator so callers never differentiate through
//! the (almost everywhere zero) derivative of `sign`.

use super::operator_registry::{
    global_operator_registry, OperatorBuilder, OperatorRegistry, RegisteredOperator,
};
use crate::PureResult;
use sp_tensor::{Tensor, TensorError};
use std::sync::Arc;

/// Registry name of the straight-through sign operator.
pub const SIGN_STE_OPERATOR: &str = "sign_ste";

/// Elementwise sign with `sign(0) = 0`. NaN is passed through.
#[inline]
pub fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        value * 0.0
    }
}

/// Builds the operator without registering it.
pub fn build_operator() -> PureResult<RegisteredOperator> {
    OperatorBuilder::new(SIGN_STE_OPERATOR, 1, 1)
        .with_description("elementwise sign with identity (straight-through) gradient")
        .with_backend("CPU")
        .with_attribute("gradient", "straight_through")
        .with_forward(Arc::new(|inputs| Ok(vec![inputs[0].map(sign)?])))
        .with_backward(Arc::new(|inputs, _outputs, grad_outputs| {
            let grad = grad_outputs[0];
            if let Some(input) = inputs.first() {
                if input.shape() != grad.shape() {
                    return Err(TensorError::ShapeMismatch {
                        left: input.shape(),
                        right: grad.shape(),
                    });
                }
            }
            Ok(vec![grad.clone()])
        }))
        .build()
}

/// Registers the operator on `registry`, failing if the name is taken.
pub fn register(registry: &OperatorRegistry) -> PureResult<Arc<RegisteredOperator>> {
    registry.register(build_operator()?)
}

/// Returns the registered operator, registering it first when absent.
pub fn ensure_registered(registry: &OperatorRegistry) -> PureResult<Arc<RegisteredOperator>> {
    if let Some(existing) = registry.get(SIGN_STE_OPERATOR) {
        return Ok(existing);
    }
    match register(registry) {
        Ok(operator) => Ok(operator),
        // Another thread won the registration race.
        Err(err) => registry.get(SIGN_STE_OPERATOR).ok_or(err),
    }
}

/// Handle to the operator living in the global registry.
pub fn global() -> PureResult<Arc<RegisteredOperator>> {
    ensure_registered(global_operator_registry())
}

/// Applies the quantizer forward through the global registry.
pub fn forward(input: &Tensor) -> PureResult<Tensor> {
    let mut outputs = global()?.execute(&[input])?;
    outputs
        .pop()
        .ok_or_else(|| TensorError::Generic(format!("{SIGN_STE_OPERATOR} produced no output")))
}

/// Applies the straight-through gradient rule through the global registry.
pub fn backward(input: &Tensor, output: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
    let mut grads = global()?.backward(&[input], &[output], &[grad_output])?;
    grads
        .pop()
        .ok_or_else(|| TensorError::Generic(format!("{SIGN_STE_OPERATOR} produced no gradient")))
}
