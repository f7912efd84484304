// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use crate::{PureResult, Tensor};
use sp_core::ops::sign_ste;

/// Binarises activations with `sign` and lets gradients through unchanged.
///
/// Both passes dispatch to the `sign_ste` operator registered in the global
/// operator registry, so the gradient rule is the operator's own rather than
/// the derivative of the forward body.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignQuantize;

impl SignQuantize {
    pub fn new() -> Self {
        Self
    }
}

impl Module for SignQuantize {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        sign_ste::forward(input)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let output = sign_ste::forward(input)?;
        sign_ste::backward(input, &output, grad_output)
    }
}

impl Parameterized for SignQuantize {
    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_binarises_and_backward_is_identity() {
        let mut quantize = SignQuantize::new();
        let input = Tensor::from_vec(1, 4, vec![-0.2, 0.0, 0.7, -3.0]).unwrap();
        let out = quantize.forward(&input).unwrap();
        assert_eq!(out.data(), &[-1.0, 0.0, 1.0, -1.0]);
        let grad = Tensor::from_vec(1, 4, vec![1.0, 2.0, -3.0, 0.5]).unwrap();
        assert_eq!(quantize.backward(&input, &grad).unwrap(), grad);
    }

    #[test]
    fn quantizing_twice_is_a_no_op() {
        let quantize = SignQuantize::new();
        let input = Tensor::random_normal(3, 32, 0.0, 1.0, Some(12)).unwrap();
        let once = quantize.forward(&input).unwrap();
        let twice = quantize.forward(&once).unwrap();
        assert_eq!(once, twice);
    }
}
